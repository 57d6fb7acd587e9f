// SPDX-License-Identifier: GPL-3.0-only

use zbus::{
    zvariant::{Structure, Value},
    Message,
};

/// Locations in the order the caller sent them.
pub type UriList = Vec<String>;

// Initial capacity of a decoded array, grows geometrically after that
const INITIAL_CAPACITY: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported argument signature {0:?}")]
    UnsupportedShape(String),
    #[error("call has no arguments")]
    MissingArgument,
    #[error("expected an array of strings, found {0:?}")]
    NotAnArray(String),
    #[error("expected a string, found {0:?}")]
    NotAString(String),
    #[error("array element {index} is not a string but {signature:?}")]
    ElementNotAString { index: usize, signature: String },
    #[error("failed to read call arguments: {0}")]
    Body(#[from] zbus::Error),
}

/// Shape of the first argument of a call.
///
/// `ShowItems(as URIs, s StartupId)` and friends are matched on their prefix,
/// so the startup id is accepted and ignored. Callers sending a lone string
/// instead of an array are tolerated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArgumentShape {
    StringArray,
    String,
}

impl ArgumentShape {
    pub fn from_signature(signature: &str) -> Result<Self, DecodeError> {
        if signature.starts_with("as") {
            Ok(Self::StringArray)
        } else if signature.starts_with('s') {
            Ok(Self::String)
        } else {
            Err(DecodeError::UnsupportedShape(signature.to_string()))
        }
    }
}

/// Decodes the first of `args` into an owned list.
///
/// Nothing decoded so far survives an error.
pub fn decode(shape: ArgumentShape, args: &[Value<'_>]) -> Result<UriList, DecodeError> {
    let first = args.first().ok_or(DecodeError::MissingArgument)?;
    match shape {
        ArgumentShape::StringArray => {
            let Value::Array(array) = first else {
                return Err(DecodeError::NotAnArray(first.value_signature().to_string()));
            };

            let mut uris = UriList::with_capacity(INITIAL_CAPACITY);
            for (index, element) in array.iter().enumerate() {
                match element {
                    Value::Str(uri) => uris.push(uri.as_str().to_string()),
                    other => {
                        return Err(DecodeError::ElementNotAString {
                            index,
                            signature: other.value_signature().to_string(),
                        })
                    }
                }
            }
            Ok(uris)
        }
        ArgumentShape::String => match first {
            Value::Str(uri) => Ok(vec![uri.as_str().to_string()]),
            other => Err(DecodeError::NotAString(
                other.value_signature().to_string(),
            )),
        },
    }
}

/// Decodes the URIs carried by a `ShowFolders`-style call.
pub fn decode_message(msg: &Message) -> Result<UriList, DecodeError> {
    let header = msg.header();
    let signature = header.signature().map(|s| s.as_str()).unwrap_or_default();
    let shape = ArgumentShape::from_signature(signature)?;

    let body = msg.body();
    let args: Structure<'_> = body.deserialize()?;
    decode(shape, args.fields())
}
