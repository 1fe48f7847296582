//! Plain-text listing written next to extracted files.

use std::io::Write;

use crate::entry::VolumeFile;
use crate::Result;

/// File name of the manifest in an extraction directory.
pub const MANIFEST_NAME: &str = "files.txt";

/// Write a manifest: a heading, the file count, a blank line, then one line
/// per file in payload offset order.
pub fn write_manifest<'a, W, I>(writer: &mut W, files: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a VolumeFile>,
{
    let mut files: Vec<&VolumeFile> = files.into_iter().collect();
    files.sort_by_key(|file| file.offset);

    writeln!(writer, "# GT.VOL contents, generated by gtvol")?;
    writeln!(writer, "Files: {}", files.len())?;
    writeln!(writer)?;
    for file in files {
        writeln!(writer, "{file}")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_layout() {
        let files = vec![
            VolumeFile {
                path: "a.txt".to_string(),
                offset: 0,
                compressed: true,
                compressed_size: 18,
                uncompressed_size: 10,
            },
            VolumeFile {
                path: "dir/b.bin".to_string(),
                offset: 0x40,
                compressed: false,
                compressed_size: 5000,
                uncompressed_size: 5000,
            },
        ];

        let mut out = Vec::new();
        write_manifest(&mut out, &files).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "Files: 2");
        assert_eq!(lines[2], "");
        assert!(lines[3].starts_with("a.txt | Offset: 00000000 | Compressed: true"));
        assert_eq!(
            lines[4],
            "dir/b.bin | Offset: 00000040 | Compressed: false | ZSize: 00001388 | Size: 00001388"
        );
    }

    #[test]
    fn test_manifest_follows_payload_order() {
        let file = |path: &str, offset: u64| VolumeFile {
            path: path.to_string(),
            offset,
            compressed: false,
            compressed_size: 1,
            uncompressed_size: 1,
        };
        // Traversal order differs from placement order.
        let files = vec![
            file("z/last.bin", 0x80),
            file("a.bin", 0xC0),
            file("m/first.bin", 0),
            file("m/second.bin", 0x40),
        ];

        let mut out = Vec::new();
        write_manifest(&mut out, &files).unwrap();
        let text = String::from_utf8(out).unwrap();
        let paths: Vec<&str> = text
            .lines()
            .skip(3)
            .filter_map(|line| line.split(" | ").next())
            .collect();

        assert_eq!(text.lines().nth(1), Some("Files: 4"));
        assert_eq!(paths, ["m/first.bin", "m/second.bin", "z/last.bin", "a.bin"]);
    }
}
