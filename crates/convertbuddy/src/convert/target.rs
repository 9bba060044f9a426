use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::storage::MAX_BATCH_LEN;

/// The fixed dispatch table of supported conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionTarget {
    Mp4ToMp3,
    PdfToJpg,
    JpgToPdf,
    DocxToPdf,
}

impl ConversionTarget {
    pub const ALL: [ConversionTarget; 4] = [
        ConversionTarget::DocxToPdf,
        ConversionTarget::JpgToPdf,
        ConversionTarget::Mp4ToMp3,
        ConversionTarget::PdfToJpg,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConversionTarget::Mp4ToMp3 => "mp4->mp3",
            ConversionTarget::PdfToJpg => "pdf->jpg",
            ConversionTarget::JpgToPdf => "jpg->pdf",
            ConversionTarget::DocxToPdf => "docx->pdf",
        }
    }

    /// Comma-separated list for error messages.
    pub fn supported() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Only image-to-PDF takes an ordered batch.
    pub fn accepts_multiple_inputs(self) -> bool {
        matches!(self, ConversionTarget::JpgToPdf)
    }

    /// Base name of the zip produced when a conversion yields several files.
    pub fn archive_stem(self) -> &'static str {
        match self {
            ConversionTarget::Mp4ToMp3 => "audio",
            ConversionTarget::PdfToJpg => "pages",
            ConversionTarget::JpgToPdf => "document",
            ConversionTarget::DocxToPdf => "docs",
        }
    }

    pub fn check_input_count(self, count: usize) -> Result<(), ValidationError> {
        let ok = if self.accepts_multiple_inputs() {
            (1..=MAX_BATCH_LEN).contains(&count)
        } else {
            count == 1
        };
        if ok {
            return Ok(());
        }

        Err(ValidationError::InputCount {
            target: self.as_str().to_string(),
            expected: if self.accepts_multiple_inputs() {
                format!("1 to {}", MAX_BATCH_LEN)
            } else {
                "exactly 1".to_string()
            },
            actual: count,
        })
    }
}

impl fmt::Display for ConversionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionTarget {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnsupportedTarget {
                target: s.to_string(),
                supported: Self::supported(),
            })
    }
}

pub const DEFAULT_BITRATE: &str = "192k";
pub const PDF_TO_JPG_DEFAULT_DPI: u32 = 200;
pub const JPG_TO_PDF_DEFAULT_DPI: u32 = 300;
pub const MAX_DPI: u32 = 1200;

/// MP3 bitrates ffmpeg's encoder accepts, in kbit/s.
const ALLOWED_BITRATES: [u32; 11] = [32, 48, 64, 96, 112, 128, 160, 192, 224, 256, 320];

/// Typed options for one target. Keys the target does not use are ignored,
/// missing keys take the target's default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOptions {
    Audio { bitrate: String },
    Raster { dpi: u32 },
    Document,
}

impl ConversionOptions {
    pub fn defaults(target: ConversionTarget) -> Self {
        match target {
            ConversionTarget::Mp4ToMp3 => ConversionOptions::Audio {
                bitrate: DEFAULT_BITRATE.to_string(),
            },
            ConversionTarget::PdfToJpg => ConversionOptions::Raster {
                dpi: PDF_TO_JPG_DEFAULT_DPI,
            },
            ConversionTarget::JpgToPdf => ConversionOptions::Raster {
                dpi: JPG_TO_PDF_DEFAULT_DPI,
            },
            ConversionTarget::DocxToPdf => ConversionOptions::Document,
        }
    }

    pub fn from_map(
        target: ConversionTarget,
        options: &Map<String, Value>,
    ) -> Result<Self, ValidationError> {
        match Self::defaults(target) {
            ConversionOptions::Audio { bitrate } => match options.get("bitrate") {
                Some(value) => Ok(ConversionOptions::Audio {
                    bitrate: parse_bitrate(value)?,
                }),
                None => Ok(ConversionOptions::Audio { bitrate }),
            },
            ConversionOptions::Raster { dpi } => match options.get("dpi") {
                Some(value) => Ok(ConversionOptions::Raster {
                    dpi: parse_dpi(value)?,
                }),
                None => Ok(ConversionOptions::Raster { dpi }),
            },
            ConversionOptions::Document => Ok(ConversionOptions::Document),
        }
    }

    pub fn bitrate(&self) -> &str {
        match self {
            ConversionOptions::Audio { bitrate } => bitrate,
            _ => DEFAULT_BITRATE,
        }
    }

    pub fn dpi(&self, default: u32) -> u32 {
        match self {
            ConversionOptions::Raster { dpi } => *dpi,
            _ => default,
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidOption {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Accepts `"192k"`, `"192K"` or a bare number of kbit/s.
fn parse_bitrate(value: &Value) -> Result<String, ValidationError> {
    let kbps = match value {
        Value::String(s) => {
            let trimmed = s.trim();
            let digits = trimmed
                .strip_suffix('k')
                .or_else(|| trimmed.strip_suffix('K'))
                .unwrap_or(trimmed);
            digits
                .parse::<u32>()
                .map_err(|_| invalid("bitrate", format!("'{}' is not a bitrate", s)))?
        }
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| invalid("bitrate", format!("{} is not a bitrate", n)))?,
        other => return Err(invalid("bitrate", format!("unexpected value {}", other))),
    };

    if !ALLOWED_BITRATES.contains(&kbps) {
        return Err(invalid(
            "bitrate",
            format!("{}k is not one of the supported MP3 bitrates", kbps),
        ));
    }
    Ok(format!("{}k", kbps))
}

fn parse_dpi(value: &Value) -> Result<u32, ValidationError> {
    let dpi = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid("dpi", format!("{} is not a positive integer", value)))?;

    if dpi == 0 || dpi > u64::from(MAX_DPI) {
        return Err(invalid("dpi", format!("must be between 1 and {}", MAX_DPI)));
    }
    Ok(dpi as u32)
}
