use std::io;
use std::path::Path;
use std::rc::Rc;

use encoding_rs::{DecoderResult, Encoding};

use crate::input::string_input::StringInput;
use crate::input::{InputStream, Source};

/// A file input with a configurable source encoding (UTF-8 by default).
///
/// The file is decoded up front with `encoding_rs`. Undecodable bytes are
/// skipped and decoding continues with whatever follows; readers see one
/// [`crate::input::Chr::Err`] at the first skipped position and then the
/// recovered content.
pub struct FileInput;

impl FileInput {
    /// Opens `path`, decoding from `encoding` (an encoding label such as
    /// `"UTF-8"` or `"GBK"`); `None` means UTF-8.
    pub fn open(path: &Path, encoding: Option<&str>) -> io::Result<Source> {
        let bytes = std::fs::read(path)?;
        let enc = match encoding {
            Some(label) => Encoding::for_label(label.as_bytes()).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown encoding \"{label}\""),
                )
            })?,
            None => encoding_rs::UTF_8,
        };

        let (text, err_at) = decode(&bytes, enc);
        let name = path.display().to_string();
        let stream: Box<dyn InputStream> = Box::new(StringInput::with_error_at(text, err_at));
        Ok(Source::new(name, stream))
    }
}

/// Decodes `bytes`, skipping past each undecodable sequence and keeping
/// every valid byte that follows. Returns the decoded text plus the offset
/// of the first skipped error, reported once to the reader.
fn decode(bytes: &[u8], enc: &'static Encoding) -> (Rc<str>, Option<usize>) {
    let mut decoder = enc.new_decoder_without_bom_handling();
    let mut out = String::with_capacity(bytes.len() + 4);
    let mut err_at = None;
    let mut pos = 0;

    loop {
        let (result, read) =
            decoder.decode_to_string_without_replacement(&bytes[pos..], &mut out, true);
        pos += read;
        match result {
            DecoderResult::InputEmpty => break,
            DecoderResult::OutputFull => {
                out.reserve(bytes.len() - pos + 16);
            }
            DecoderResult::Malformed(_, _) => {
                // The malformed bytes are consumed; remember only the first
                // spot so the error reports once.
                err_at.get_or_insert(out.len());
            }
        }
    }

    (Rc::from(out.as_str()), err_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Chr;

    #[test]
    fn decodes_utf8_file() {
        let dir = std::env::temp_dir();
        let path = dir.join("ox_core_file_input_test.ox");
        std::fs::write(&path, "ab\u{00e9}").unwrap();

        let mut src = FileInput::open(&path, None).unwrap();
        assert_eq!(src.get_char(), Chr::Char('a'));
        assert_eq!(src.get_char(), Chr::Char('b'));
        assert_eq!(src.get_char(), Chr::Char('\u{00e9}'));
        assert_eq!(src.get_char(), Chr::End);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn bad_bytes_report_once_then_end() {
        let dir = std::env::temp_dir();
        let path = dir.join("ox_core_file_input_bad.ox");
        std::fs::write(&path, [b'o', b'k', 0xff, 0xfe]).unwrap();

        let mut src = FileInput::open(&path, None).unwrap();
        assert_eq!(src.get_char(), Chr::Char('o'));
        assert_eq!(src.get_char(), Chr::Char('k'));
        assert_eq!(src.get_char(), Chr::Err);
        assert_eq!(src.get_char(), Chr::End);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn content_after_a_bad_byte_is_recovered() {
        let dir = std::env::temp_dir();
        let path = dir.join("ox_core_file_input_mid.ox");
        std::fs::write(&path, [b'a', 0xff, b'b', b'c', 0xfe, b'd']).unwrap();

        let mut src = FileInput::open(&path, None).unwrap();
        assert_eq!(src.get_char(), Chr::Char('a'));
        // One error for the first skipped byte, then decoding resumes;
        // later bad bytes are skipped silently.
        assert_eq!(src.get_char(), Chr::Err);
        assert_eq!(src.get_char(), Chr::Char('b'));
        assert_eq!(src.get_char(), Chr::Char('c'));
        assert_eq!(src.get_char(), Chr::Char('d'));
        assert_eq!(src.get_char(), Chr::End);

        std::fs::remove_file(&path).ok();
    }
}
