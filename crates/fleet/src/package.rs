//! Code archives
//!
//! A monitor's source directory is zipped under the runtime prefix into a
//! temporary file. The archive lives exactly as long as the returned
//! [`CodeArchive`]: dropping it deletes the file on every exit path of the
//! owning pipeline.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::monitor::{CodeSource, Runtime};
use crate::pattern::{self, Pattern};

#[derive(Debug)]
pub struct CodeArchive {
    file: NamedTempFile,
    monitor: String,
}

impl CodeArchive {
    /// Zip `code.src` for `monitor` into a new file in `dir`
    pub fn create(dir: &Path, monitor: &str, code: &CodeSource, runtime: Runtime) -> Result<Self> {
        let package_err = |message: String| Error::Package {
            path: code.src.clone(),
            message,
        };

        if !code.src.is_dir() {
            return Err(package_err("source directory not found".to_string()));
        }
        let excludes: Vec<Pattern> = pattern::compile_all(&code.exclude)?;

        fs::create_dir_all(dir)?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{monitor}-"))
            .suffix(".zip")
            .tempfile_in(dir)?;

        let prefix = runtime.archive_prefix();
        let options = zip::write::SimpleFileOptions::default();
        let mut zip = zip::ZipWriter::new(file.as_file_mut());
        let mut entries = 0;

        for entry in WalkDir::new(&code.src).sort_by_file_name() {
            let entry = entry.map_err(|e| package_err(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&code.src) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if pattern::any_match(&excludes, &relative) {
                log::trace!("[{monitor}] excluded {relative}");
                continue;
            }

            zip.start_file(format!("{prefix}/{relative}"), options)
                .map_err(|e| package_err(e.to_string()))?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut zip)?;
            entries += 1;
        }

        zip.finish().map_err(|e| package_err(e.to_string()))?;
        log::debug!(
            "[{monitor}] packaged {entries} files into {}",
            file.path().display()
        );

        Ok(Self {
            file,
            monitor: monitor.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Object name used when uploading, `{monitor}.zip`
    pub fn file_name(&self) -> String {
        format!("{}.zip", self.monitor)
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(fs::read(self.file.path())?)
    }
}

impl Drop for CodeArchive {
    fn drop(&mut self) {
        log::debug!("[{}] removing {}", self.monitor, self.file.path().display());
    }
}
