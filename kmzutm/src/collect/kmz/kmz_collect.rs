use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::KmzError;

/// Collects the KML payload of a KMZ archive (or a bare .kml file)
/// The archive is opened, its first .kml entry is extracted to a scratch
/// directory and decoded into `content`.
pub struct KmzCollect {
    /// Path to the .kmz archive or .kml file
    pub input_path: PathBuf,
    /// Decoded KML document
    pub content: Option<String>,
    /// Name of the entry that was extracted from the archive
    pub kml_entry: Option<String>,
    /// Location of the extracted KML on disk
    pub kml_path: Option<PathBuf>,
    /// Extract into this directory instead of a temporary one
    keep_dir: Option<PathBuf>,
    /// Scratch directory, removed when the collector is dropped
    temp_dir: Option<TempDir>,
}

impl KmzCollect {
    pub fn new<P: AsRef<Path>>(input_path: P) -> Self {
        KmzCollect {
            input_path: input_path.as_ref().to_path_buf(),
            content: None,
            kml_entry: None,
            kml_path: None,
            keep_dir: None,
            temp_dir: None,
        }
    }

    /// Keep the extracted KML inside `dir` after the run
    pub fn set_keep_dir(&mut self, dir: Option<PathBuf>) {
        self.keep_dir = dir;
    }

    /// Read the input and fill `content` with the KML text
    pub fn execute(&mut self) -> Result<()> {
        let kml_path = if Self::is_kml(&self.input_path) {
            info!("Reading KML {:?}", self.input_path);
            self.input_path.clone()
        } else {
            info!("Opening KMZ {:?}", self.input_path);
            self.extract_kml()?
        };

        let bytes = fs::read(&kml_path)
            .with_context(|| format!("Failed to read KML file: {:?}", kml_path))?;
        self.content = Some(Self::decode_kml(&bytes));
        self.kml_path = Some(kml_path);

        Ok(())
    }

    /// Get the decoded KML document
    pub fn get_content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    fn is_kml(path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("kml"))
            .unwrap_or(false)
    }

    /// Extract the KML entry of the archive and return where it landed
    fn extract_kml(&mut self) -> Result<PathBuf> {
        let file = File::open(&self.input_path)
            .with_context(|| format!("Failed to open KMZ archive: {:?}", self.input_path))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("Failed to read KMZ archive: {:?}", self.input_path))?;

        let entry = Self::find_kml_entry(&mut archive).ok_or_else(|| KmzError::NoKmlEntry {
            archive: self.input_path.display().to_string(),
        })?;
        debug!("Found KML entry {} in archive", entry);

        let target_dir = match &self.keep_dir {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory: {:?}", dir))?;
                dir.clone()
            }
            None => {
                let temp_dir =
                    TempDir::new().context("Failed to create temporary directory for KML")?;
                let path = temp_dir.path().to_path_buf();
                self.temp_dir = Some(temp_dir);
                path
            }
        };

        let mut zipped = archive
            .by_name(&entry)
            .with_context(|| format!("Failed to read archive entry {}", entry))?;
        let relative = zipped
            .enclosed_name()
            .map(Path::to_path_buf)
            .with_context(|| format!("Unsafe path inside archive: {}", entry))?;
        let outpath = target_dir.join(relative);

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)
            .with_context(|| format!("Failed to create {:?}", outpath))?;
        io::copy(&mut zipped, &mut outfile)
            .with_context(|| format!("Failed to extract {} from archive", entry))?;

        if self.keep_dir.is_some() {
            info!("Extracted KML kept at {:?}", outpath);
        }
        self.kml_entry = Some(entry);

        Ok(outpath)
    }

    /// First entry (archive order) whose name ends with .kml
    pub fn find_kml_entry<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Option<String> {
        (0..archive.len()).find_map(|i| {
            let file = archive.by_index_raw(i).ok()?;
            let name = file.name().to_string();
            (!file.is_dir() && name.to_ascii_lowercase().ends_with(".kml")).then_some(name)
        })
    }

    /// Decode KML bytes: UTF-8 (BOM removed) with a Windows-1252 fallback
    pub fn decode_kml(bytes: &[u8]) -> String {
        let (text, had_errors) = encoding_rs::UTF_8.decode_with_bom_removal(bytes);
        if !had_errors {
            return text.into_owned();
        }

        warn!("KML is not valid UTF-8, decoding as Windows-1252");
        let (text, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
        text.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    const KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document/></kml>"#;

    fn write_kmz(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("test.kmz");
        let mut zw = ZipWriter::new(File::create(&path).unwrap());
        for (name, body) in entries {
            zw.start_file(*name, FileOptions::default()).unwrap();
            zw.write_all(body.as_bytes()).unwrap();
        }
        zw.finish().unwrap();
        path
    }

    #[test]
    fn test_kmz_extracts_first_kml() {
        let dir = TempDir::new().unwrap();
        let kmz = write_kmz(
            dir.path(),
            &[
                ("files/icon.png", "not an image"),
                ("doc.kml", KML),
                ("other.kml", "<kml/>"),
            ],
        );

        let mut collect = KmzCollect::new(&kmz);
        collect.execute().unwrap();

        assert_eq!(collect.kml_entry.as_deref(), Some("doc.kml"));
        assert_eq!(collect.get_content(), Some(KML));
    }

    #[test]
    fn test_kmz_without_kml_is_fatal() {
        let dir = TempDir::new().unwrap();
        let kmz = write_kmz(dir.path(), &[("readme.txt", "hello")]);

        let mut collect = KmzCollect::new(&kmz);
        let err = collect.execute().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<KmzError>(),
            Some(KmzError::NoKmlEntry { .. })
        ));
    }

    #[test]
    fn test_temp_dir_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let kmz = write_kmz(dir.path(), &[("doc.kml", KML)]);

        let mut collect = KmzCollect::new(&kmz);
        collect.execute().unwrap();
        let extracted = collect.kml_path.clone().unwrap();
        assert!(extracted.exists());

        drop(collect);
        assert!(!extracted.exists());
    }

    #[test]
    fn test_keep_dir_retains_kml() {
        let dir = TempDir::new().unwrap();
        let kmz = write_kmz(dir.path(), &[("nested/Doc.KML", KML)]);
        let keep = dir.path().join("out");

        let mut collect = KmzCollect::new(&kmz);
        collect.set_keep_dir(Some(keep.clone()));
        collect.execute().unwrap();
        drop(collect);

        assert!(keep.join("nested/Doc.KML").exists());
    }

    #[test]
    fn test_plain_kml_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.kml");
        fs::write(&path, KML).unwrap();

        let mut collect = KmzCollect::new(&path);
        collect.execute().unwrap();

        assert!(collect.kml_entry.is_none());
        assert_eq!(collect.get_content(), Some(KML));
    }

    #[test]
    fn test_decode_kml_fallbacks() {
        assert_eq!(KmzCollect::decode_kml(b"\xEF\xBB\xBF<kml/>"), "<kml/>");
        // 0xE9 is "é" in Windows-1252 and invalid as a lone UTF-8 byte
        assert_eq!(KmzCollect::decode_kml(b"caf\xE9"), "café");
    }
}
