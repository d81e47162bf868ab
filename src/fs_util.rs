use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::BuscoError;

/// Pack `dir` into `<dir>.zip` next to it and remove the directory.
pub fn archive_dir(dir: &Path) -> Result<PathBuf, BuscoError> {
    let zip_path = dir.with_extension("zip");
    let file = fs::File::create(&zip_path)
        .map_err(|err| BuscoError::Filesystem(format!("create {}: {err}", zip_path.display())))?;
    let mut writer = ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = fs::read_dir(&current)
            .map_err(|err| BuscoError::Filesystem(err.to_string()))?
            .flatten()
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        entries.sort();
        for path in entries {
            let name = path
                .strip_prefix(dir)
                .map_err(|err| BuscoError::Filesystem(err.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            if path.is_dir() {
                writer
                    .add_directory(format!("{name}/"), options)
                    .map_err(|err| BuscoError::Filesystem(err.to_string()))?;
                stack.push(path);
                continue;
            }
            writer
                .start_file(name, options)
                .map_err(|err| BuscoError::Filesystem(err.to_string()))?;
            let mut input =
                fs::File::open(&path).map_err(|err| BuscoError::Filesystem(err.to_string()))?;
            io::copy(&mut input, &mut writer)
                .map_err(|err| BuscoError::Filesystem(err.to_string()))?;
        }
    }

    let mut file = writer
        .finish()
        .map_err(|err| BuscoError::Filesystem(err.to_string()))?;
    file.flush()
        .map_err(|err| BuscoError::Filesystem(err.to_string()))?;
    fs::remove_dir_all(dir)
        .map_err(|err| BuscoError::Filesystem(format!("remove {}: {err}", dir.display())))?;
    Ok(zip_path)
}

/// Decompress a `.gz` file to `target`.
pub fn gunzip(source: &Path, target: &Path) -> Result<(), BuscoError> {
    let input = fs::File::open(source)
        .map_err(|err| BuscoError::Filesystem(format!("open {}: {err}", source.display())))?;
    let mut decoder = GzDecoder::new(input);
    let mut output = fs::File::create(target)
        .map_err(|err| BuscoError::Filesystem(format!("create {}: {err}", target.display())))?;
    io::copy(&mut decoder, &mut output)
        .map_err(|err| BuscoError::Filesystem(format!("decompress {}: {err}", source.display())))?;
    Ok(())
}
