//! Per-run configuration: compiler-matching flags and source encodings.

use std::fmt;

use crate::error::{Error, Result};

/// Optimization level the companion compiler invocation uses.
///
/// The level decides how many prologue instructions the compiler emits for a
/// dummy function, which in turn decides how many instruction slots the
/// replacement body must skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    /// `-g`
    G,
    /// `-O2 -g3`
    G3,
}

/// How `.mdebug` static symbols are surfaced in the spliced object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConvertStatics {
    /// Leave the symbol table alone
    No,
    /// Synthesize statics as local symbols
    Local,
    /// Synthesize statics as global symbols
    Global,
    /// Synthesize globals whose emitted names are prefixed with the object
    /// file name, keeping the bare name for reference resolution
    GlobalWithFilename,
}

/// A byte encoding for source text, resolved from a WHATWG label such as
/// `latin1`, `shift_jis` or `utf-8`.
#[derive(Clone, Copy)]
pub struct Encoding(&'static encoding_rs::Encoding);

impl Encoding {
    /// Resolves an encoding label. Unknown labels are a failure.
    pub fn from_label(label: &str) -> Result<Encoding> {
        encoding_rs::Encoding::for_label(label.as_bytes())
            .map(Encoding)
            .ok_or_else(|| Error::failure(format!("unsupported encoding: {}", label)))
    }

    /// The canonical name of the resolved encoding.
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Encodes text, failing on characters the encoding cannot represent.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let (bytes, _, had_errors) = self.0.encode(text);
        if had_errors {
            return Err(Error::Encode(format!(
                "cannot represent text in {}: {:?}",
                self.name(),
                text
            )));
        }
        Ok(bytes.into_owned())
    }

    /// Decodes bytes, failing on sequences that are invalid for the encoding.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        let (text, had_errors) = self.0.decode_without_bom_handling(bytes);
        if had_errors {
            return Err(Error::Encode(format!(
                "input is not valid {}",
                self.name()
            )));
        }
        Ok(text.into_owned())
    }
}

impl fmt::Debug for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Encoding").field(&self.name()).finish()
    }
}

/// Immutable per-run configuration shared by every pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct Opts {
    pub opt: OptLevel,
    pub framepointer: bool,
    pub mips1: bool,
    pub kpic: bool,
    /// Source language is Pascal rather than C (decided by file extension)
    pub pascal: bool,
    pub input_enc: Encoding,
    pub output_enc: Encoding,
    /// Rewrite float literals inside `CutsceneData` arrays to their bit patterns
    pub enable_cutscene_data_float_encoding: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_round_trips_every_byte_value() {
        let enc = Encoding::from_label("latin1").unwrap();
        let text: String = (0x20u8..=0x7e).map(|b| b as char).collect();
        let bytes = enc.encode(&text).unwrap();
        assert_eq!(enc.decode(&bytes).unwrap(), text);
    }

    #[test]
    fn unknown_label_is_rejected() {
        assert!(Encoding::from_label("definitely-not-an-encoding").is_err());
    }

    #[test]
    fn unrepresentable_text_fails_encode() {
        let enc = Encoding::from_label("latin1").unwrap();
        assert!(enc.encode("\u{4e16}\u{754c}").is_err());
    }
}
