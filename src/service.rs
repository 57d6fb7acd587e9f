// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use futures_util::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use zbus::{
    fdo::{self, DBusProxy, RequestNameFlags, RequestNameReply},
    message::{self, Header},
    names::WellKnownName,
    Connection, Message, MessageStream,
};

use crate::{
    file_manager::{Dispatch, FileManager},
    BUS_NAME, INTERFACE, OBJECT_PATH,
};

/// Whether the service keeps accepting calls.
///
/// Starts out running and is stopped at most once, by `Exit` or a signal.
#[derive(Debug)]
pub struct RunState(AtomicBool);

impl Default for RunState {
    fn default() -> Self {
        Self(AtomicBool::new(true))
    }
}

impl RunState {
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns true if this call stopped the service.
    pub fn stop(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Connects to the session bus and claims [`BUS_NAME`].
///
/// The returned stream already receives messages, including a call the bus
/// held back while activating us and delivers as soon as the name is ours.
pub async fn connect() -> zbus::Result<(Connection, MessageStream)> {
    let conn = zbus::connection::Builder::session()?.build().await?;
    log::info!("connected to bus as {:?}", conn.unique_name());

    // zbus drops messages no stream is listening for
    let stream = MessageStream::from(&conn);

    // The name is requested without an object server so every call reaches
    // the message stream and gets answered by us
    let name = WellKnownName::try_from(BUS_NAME)?;
    let reply = DBusProxy::new(&conn)
        .await?
        .request_name(name, RequestNameFlags::DoNotQueue.into())
        .await?;
    match reply {
        RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => Ok((conn, stream)),
        _ => Err(zbus::Error::NameTaken),
    }
}

/// Whether a method call targets our object and interface.
pub fn is_for_us(header: &Header<'_>) -> bool {
    let path_matches = header.path().is_some_and(|path| path.as_str() == OBJECT_PATH);
    // Calls may leave out the interface
    let interface_matches = header
        .interface()
        .map_or(true, |interface| interface.as_str() == INTERFACE);
    path_matches && interface_matches
}

async fn handle(conn: &Connection, file_manager: &FileManager, msg: &Message) {
    let header = msg.header();
    if msg.message_type() != message::Type::MethodCall {
        return;
    }
    if !is_for_us(&header) {
        log::debug!(
            "ignoring call {:?}.{:?} on {:?}",
            header.interface(),
            header.member(),
            header.path()
        );
        let err = fdo::Error::UnknownObject(format!(
            "{:?} is not served here",
            header.path().map(|path| path.as_str())
        ));
        if let Err(err) = conn.reply_dbus_error(&header, err).await {
            log::warn!("failed to send error reply: {}", err);
        }
        return;
    }

    match file_manager.dispatch(msg) {
        Dispatch::Exit { stopped: false } => log::debug!("already exiting"),
        Dispatch::Ignored(name) => log::debug!("acknowledged unknown method {:?}", name),
        _ => (),
    }

    if let Err(err) = conn.reply(msg, &()).await {
        log::warn!("failed to reply to {:?}: {}", header.member(), err);
    }
}

/// Serves calls from `stream` one at a time until `Exit`, `SIGTERM` or `SIGINT`.
///
/// A launch blocks the loop until the file manager exits; signals arriving in
/// the meantime are picked up once it has.
pub async fn run(
    conn: &Connection,
    mut stream: MessageStream,
    file_manager: &FileManager,
) -> io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    log::info!("listening for method calls...");
    while file_manager.run_state().is_running() {
        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("received SIGTERM");
                file_manager.run_state().stop();
            }
            _ = sigint.recv() => {
                log::info!("received SIGINT");
                file_manager.run_state().stop();
            }
            next = stream.next() => match next {
                Some(Ok(msg)) => handle(conn, file_manager, &msg).await,
                Some(Err(err)) => {
                    log::error!("failed to process bus: {}", err);
                    break;
                }
                None => {
                    log::error!("bus connection closed");
                    break;
                }
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{error::Error, fs, path::Path, time::Duration};

    use futures_util::StreamExt;
    use tempfile::tempdir;
    use test_log::test;
    use tokio::{net::UnixStream, time::timeout};
    use zbus::{connection, message, Connection, Guid, Message, MessageStream};

    use super::{is_for_us, run, RunState};
    use crate::{
        config::LaunchConfig,
        file_manager::FileManager,
        launcher::test_utils::{not_executable, recording_script},
        INTERFACE, OBJECT_PATH,
    };

    // Long enough for a file manager script, short enough to fail a stuck loop
    const SERVE_TIMEOUT: Duration = Duration::from_secs(30);

    fn call_message<B>(path: &str, interface: Option<&str>, method: &str, body: &B) -> Message
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        let mut builder = Message::method(path, method).expect("invalid path or method");
        if let Some(interface) = interface {
            builder = builder.interface(interface).expect("invalid interface");
        }
        builder.build(body).expect("failed to build message")
    }

    fn file_manager(cmd: &Path) -> FileManager {
        FileManager::new(&LaunchConfig {
            cmd: cmd.to_path_buf(),
        })
    }

    /// A server and a client connection talking over a socket pair.
    async fn connection_pair() -> zbus::Result<(Connection, Connection)> {
        let guid = Guid::generate();
        let (server, client) = UnixStream::pair()?;
        futures_util::try_join!(
            connection::Builder::unix_stream(server)
                .server(guid)?
                .p2p()
                .build(),
            connection::Builder::unix_stream(client).p2p().build(),
        )
    }

    async fn next_reply(stream: &mut MessageStream) -> zbus::Result<Message> {
        while let Some(msg) = stream.next().await {
            let msg = msg?;
            if matches!(
                msg.message_type(),
                message::Type::MethodReturn | message::Type::Error
            ) {
                return Ok(msg);
            }
        }
        Err(zbus::Error::Failure("connection closed".to_string()))
    }

    fn assert_empty_return(reply: &Message) {
        assert_eq!(reply.message_type(), message::Type::MethodReturn);
        assert!(reply
            .header()
            .signature()
            .map_or(true, |signature| signature.as_str().is_empty()));
    }

    async fn call(client: &Connection, method: &str) -> zbus::Result<Message> {
        client
            .call_method(None::<&str>, OBJECT_PATH, Some(INTERFACE), method, &())
            .await
    }

    #[test]
    fn run_state_stops_once() {
        let run_state = RunState::default();
        assert!(run_state.is_running());
        assert!(run_state.stop());
        assert!(!run_state.is_running());
        assert!(!run_state.stop());
        assert!(!run_state.is_running());
    }

    #[test]
    fn filters_path_and_interface() {
        let accepted = [
            call_message(OBJECT_PATH, Some(INTERFACE), "ShowItems", &()),
            call_message(OBJECT_PATH, None, "Exit", &()),
            call_message(OBJECT_PATH, Some(INTERFACE), "Frobnicate", &()),
        ];
        for msg in &accepted {
            assert!(is_for_us(&msg.header()));
        }

        let rejected = [
            call_message(
                "/org/freedesktop/FileManager2",
                Some(INTERFACE),
                "ShowItems",
                &(),
            ),
            call_message(
                OBJECT_PATH,
                Some("org.freedesktop.DBus.Introspectable"),
                "Introspect",
                &(),
            ),
        ];
        for msg in &rejected {
            assert!(!is_for_us(&msg.header()));
        }
    }

    #[test(tokio::test)]
    async fn call_queued_before_run_is_answered() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let (script, output) = recording_script(dir.path())?;
        let fm = file_manager(&script);

        let (server, client) = connection_pair().await?;
        let stream = MessageStream::from(&server);
        let mut replies = MessageStream::from(&client);

        // Arrives before the loop polls, like the call that got the service activated
        let first = call_message(
            OBJECT_PATH,
            Some(INTERFACE),
            "ShowItems",
            &(vec!["file:///tmp/a", "/tmp/b"], "startup-id"),
        );
        client.send(&first).await?;

        let calls = async {
            assert_empty_return(&next_reply(&mut replies).await?);
            assert_empty_return(&call(&client, "Exit").await?);
            Ok::<_, zbus::Error>(())
        };
        let (served, called) =
            timeout(SERVE_TIMEOUT, async { tokio::join!(run(&server, stream, &fm), calls) })
                .await?;
        served?;
        called?;

        assert_eq!(fs::read_to_string(&output)?, "ShowItems\n/tmp/a\n/tmp/b\n");
        Ok(())
    }

    #[test(tokio::test)]
    async fn every_call_gets_an_empty_return_and_exit_ends_run() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let (script, output) = recording_script(dir.path())?;
        let fm = file_manager(&script);

        let (server, client) = connection_pair().await?;
        let stream = MessageStream::from(&server);

        let calls = async {
            let reply = client
                .call_method(
                    None::<&str>,
                    OBJECT_PATH,
                    Some(INTERFACE),
                    "ShowFolders",
                    &(vec!["file:///srv"],),
                )
                .await?;
            assert_empty_return(&reply);
            assert_empty_return(&call(&client, "Frobnicate").await?);
            assert_empty_return(&call(&client, "Exit").await?);
            Ok::<_, zbus::Error>(())
        };
        let (served, called) =
            timeout(SERVE_TIMEOUT, async { tokio::join!(run(&server, stream, &fm), calls) })
                .await?;
        served?;
        called?;

        // run returned on its own once Exit was handled
        assert!(!fm.run_state().is_running());
        assert_eq!(fs::read_to_string(&output)?, "ShowFolders\n/srv\n");
        Ok(())
    }

    #[test(tokio::test)]
    async fn failed_launch_is_still_acknowledged() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let plain = not_executable(dir.path())?;
        let fm = file_manager(&plain);

        let (server, client) = connection_pair().await?;
        let stream = MessageStream::from(&server);

        let calls = async {
            for method in ["ShowFolders", "ShowItems", "ShowItemProperties"] {
                let reply = client
                    .call_method(
                        None::<&str>,
                        OBJECT_PATH,
                        Some(INTERFACE),
                        method,
                        &(vec!["/tmp/a"],),
                    )
                    .await?;
                assert_empty_return(&reply);
            }
            assert_empty_return(&call(&client, "Exit").await?);
            Ok::<_, zbus::Error>(())
        };
        let (served, called) =
            timeout(SERVE_TIMEOUT, async { tokio::join!(run(&server, stream, &fm), calls) })
                .await?;
        served?;
        called?;

        Ok(())
    }

    #[test(tokio::test)]
    async fn other_objects_get_an_error_and_signals_are_ignored() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let plain = not_executable(dir.path())?;
        let fm = file_manager(&plain);

        let (server, client) = connection_pair().await?;
        let stream = MessageStream::from(&server);

        let calls = async {
            client
                .emit_signal(None::<&str>, OBJECT_PATH, INTERFACE, "Exit", &())
                .await?;

            let result = client
                .call_method(
                    None::<&str>,
                    "/org/freedesktop/FileManager2",
                    Some(INTERFACE),
                    "ShowItems",
                    &(vec!["/tmp/a"],),
                )
                .await;
            assert!(matches!(
                result,
                Err(zbus::Error::MethodError(name, _, _))
                    if name.as_str() == "org.freedesktop.DBus.Error.UnknownObject"
            ));

            // The Exit signal above must not have stopped the loop
            assert!(fm.run_state().is_running());
            assert_empty_return(&call(&client, "Exit").await?);
            Ok::<_, zbus::Error>(())
        };
        let (served, called) =
            timeout(SERVE_TIMEOUT, async { tokio::join!(run(&server, stream, &fm), calls) })
                .await?;
        served?;
        called?;

        assert!(!fm.run_state().is_running());
        Ok(())
    }
}
