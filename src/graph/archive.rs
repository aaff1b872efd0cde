//! Password-protected bundle archive.

use std::{
    fs::File,
    io::Write,
    path::Path,
};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use zip::{AesMode, CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::Result;

/// Pretty JSON with four-space indentation, non-ASCII kept verbatim.
pub fn to_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// Writes `entries` as `0.bin`, `1.bin`... into an AES-256 encrypted, deflated archive.
pub fn write_archive(
    path: &Path,
    password: &str,
    entries: &[&[u8]],
) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .with_aes_encryption(AesMode::Aes256, password);

    for (i, bytes) in entries.iter().enumerate() {
        zip.start_file(format!("{}.bin", i), options)?;
        zip.write_all(bytes)?;
    }
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;

    #[test]
    fn test_archive_entries_need_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("T1.bin");
        write_archive(&path, "T1", &[b"job".as_slice(), b"template".as_slice()]).unwrap();

        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.by_name("0.bin").is_err());

        let mut content = String::new();
        archive.by_name_decrypt("1.bin", b"T1").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "template");
        assert!(archive.by_name_decrypt("0.bin", b"wrong").is_err());
    }

    #[test]
    fn test_json_keeps_unicode() {
        let bytes = to_json_bytes(&serde_json::json!({"describe": "提示词"})).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("提示词"));
        assert!(text.contains("\n    \"describe\""));
    }
}
