use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unknown format :: {0}")]
    UnknownFormat(String),
}

impl FormatError {
    pub fn unknown_format(format_name: &str) -> Self {
        Self::UnknownFormat(format_name.to_owned())
    }
}

/// Serialization format tag attached to every topic.
///
/// The writer selects its batching discipline from this tag, and the server
/// uses it to decide how topic data is compressed, stored and indexed.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Fixed-width tabular records, a constant number of columns per row.
    /// Suitable for simple sensors such as IMUs or odometry.
    Default,

    /// Records carrying variable-length lists (point clouds, detection
    /// lists). Serialized with nested list columns.
    Ragged,

    /// Raw or compressed image payloads, one large binary blob per record
    /// plus shape metadata.
    Image,
}

impl Format {
    /// Returns the format name.
    fn name(&self) -> &'static str {
        match self {
            Format::Default => "default",
            Format::Ragged => "ragged",
            Format::Image => "image",
        }
    }
}

impl std::str::FromStr for Format {
    type Err = FormatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "default" => Ok(Self::Default),
            "ragged" => Ok(Self::Ragged),
            "image" => Ok(Self::Image),
            _ => Err(FormatError::unknown_format(value)),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn from_str() {
        let default = Format::from_str("default");
        assert!(default.is_ok());
        assert_eq!(default.as_ref().unwrap(), &Format::Default);

        let ragged = Format::from_str("ragged");
        assert!(ragged.is_ok());
        assert_eq!(ragged.as_ref().unwrap(), &Format::Ragged);

        let image = Format::from_str("image");
        assert!(image.is_ok());
        assert_eq!(image.as_ref().unwrap(), &Format::Image);

        assert!(Format::from_str("parquet").is_err());
    }

    #[test]
    fn to_str() {
        assert_eq!("ragged", Format::Ragged.to_string());
        assert_eq!("default", Format::Default.to_string());
        assert_eq!("image", Format::Image.to_string());
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&Format::Image).unwrap();
        assert_eq!(json, "\"image\"");

        let back: Format = serde_json::from_str("\"ragged\"").unwrap();
        assert_eq!(back, Format::Ragged);
    }
}
