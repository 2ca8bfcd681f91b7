/// Where batch images come from: a directory or a zip archive
///
/// Batch items are identified only by their upload name, so lookups go by entry
/// name first and by bare file name second.
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use log::{debug, info};

const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];

pub fn is_supported_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_name_of(name: &str) -> Option<&str> {
    Path::new(name).file_name().and_then(|n| n.to_str())
}

/// True when `name` cannot leave the directory it is joined onto
fn is_relative_inside(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

pub enum ImageSource {
    Directory(PathBuf),
    Zip {
        path: PathBuf,
        archive: zip::ZipArchive<BufReader<File>>,
    },
}

impl ImageSource {
    /// Open a directory, or a zip file by extension
    pub fn open(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.is_dir() {
            info!("Reading batch images from directory {}", path.display());
            return Ok(ImageSource::Directory(path.to_path_buf()));
        }

        let is_zip = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if !is_zip {
            return Err(format!("Not a directory or zip archive: {}", path.display()).into());
        }

        let file = BufReader::new(File::open(path)?);
        let archive = zip::ZipArchive::new(file)?;
        info!("Reading batch images from {} ({} entries)", path.display(), archive.len());
        Ok(ImageSource::Zip {
            path: path.to_path_buf(),
            archive,
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            ImageSource::Directory(path) => path,
            ImageSource::Zip { path, .. } => path,
        }
    }

    /// Read the bytes of the image uploaded as `name`
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        match self {
            ImageSource::Directory(dir) => {
                let direct = is_relative_inside(name).then(|| dir.join(name));
                let path = if let Some(direct) = direct.filter(|path| path.is_file()) {
                    direct
                } else {
                    let file_name = file_name_of(name).ok_or_else(|| format!("Invalid image name: {name}"))?;
                    dir.join(file_name)
                };
                debug!("Reading {}", path.display());
                Ok(std::fs::read(&path)?)
            }
            ImageSource::Zip { archive, .. } => {
                let entry_name = Self::find_zip_entry(archive, name)
                    .ok_or_else(|| format!("No entry named {name} in archive"))?;
                let mut buffer = Vec::new();
                archive.by_name(&entry_name)?.read_to_end(&mut buffer)?;
                debug!("Read {} bytes from ZIP entry: {}", buffer.len(), entry_name);
                Ok(buffer)
            }
        }
    }

    fn find_zip_entry(archive: &zip::ZipArchive<BufReader<File>>, name: &str) -> Option<String> {
        let mut by_file_name = None;
        let wanted = file_name_of(name);
        for entry in archive.file_names() {
            if entry == name {
                return Some(entry.to_string());
            }
            if by_file_name.is_none() && wanted.is_some() && file_name_of(entry) == wanted {
                by_file_name = Some(entry.to_string());
            }
        }
        by_file_name
    }

    /// Image names available in this source, sorted
    pub fn image_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self {
            ImageSource::Directory(dir) => std::fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .filter_map(|entry| entry.ok())
                        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            ImageSource::Zip { archive, .. } => archive.file_names().map(str::to_string).collect(),
        };
        names.retain(|name| is_supported_image(name) && !name.ends_with('/'));
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_image("a.JPG"));
        assert!(is_supported_image("dir/b.webp"));
        assert!(!is_supported_image("notes.txt"));
        assert!(!is_supported_image("noext"));
    }

    #[test]
    fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"jpeg").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"text").unwrap();

        let mut source = ImageSource::open(dir.path()).unwrap();
        assert_eq!(source.image_names(), vec!["a.jpg".to_string()]);
        assert_eq!(source.read("a.jpg").unwrap(), b"jpeg");
        // Upload names may carry a client-side folder
        assert_eq!(source.read("photos/a.jpg").unwrap(), b"jpeg");
        assert!(source.read("missing.jpg").is_err());
    }

    #[test]
    fn test_directory_reads_stay_inside() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        std::fs::create_dir(&images).unwrap();
        std::fs::write(root.path().join("secret.jpg"), b"outside").unwrap();
        std::fs::write(root.path().join("only-outside.jpg"), b"outside").unwrap();
        std::fs::write(images.join("secret.jpg"), b"inside").unwrap();

        let mut source = ImageSource::open(&images).unwrap();
        assert_eq!(source.read("../secret.jpg").unwrap(), b"inside");
        let absolute = root.path().join("secret.jpg");
        assert_eq!(source.read(absolute.to_str().unwrap()).unwrap(), b"inside");
        assert!(source.read("../only-outside.jpg").is_err());
        assert!(source.read("./secret.jpg").is_ok());
    }

    #[test]
    fn test_zip_source() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("batch.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&zip_path).unwrap());
            let options = SimpleFileOptions::default();
            writer.start_file("images/a.png", options).unwrap();
            writer.write_all(b"png-a").unwrap();
            writer.start_file("b.jpg", options).unwrap();
            writer.write_all(b"jpg-b").unwrap();
            writer.start_file("notes.txt", options).unwrap();
            writer.write_all(b"x").unwrap();
            writer.finish().unwrap();
        }

        let mut source = ImageSource::open(&zip_path).unwrap();
        assert_eq!(source.image_names(), vec!["b.jpg".to_string(), "images/a.png".to_string()]);
        assert_eq!(source.read("b.jpg").unwrap(), b"jpg-b");
        assert_eq!(source.read("a.png").unwrap(), b"png-a");
        assert!(source.read("c.png").is_err());
    }

    #[test]
    fn test_rejects_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        std::fs::write(&path, b"{}").unwrap();
        assert!(ImageSource::open(&path).is_err());
    }
}
