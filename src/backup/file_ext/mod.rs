use itertools::Itertools;

static TAR_FILE_EXT: &str = "tar";

/// Layers that contribute a suffix to the container file name
/// (`tar`, `tar.xz`, `tar.xz.age`, ...).
pub trait FileExtProvider {
    fn file_ext(&self) -> Option<&'static str>;
}

/// Extension of a container written through `layers`, innermost first.
pub fn container_file_ext(layers: &[&dyn FileExtProvider]) -> String {
    std::iter::once(TAR_FILE_EXT)
        .chain(layers.iter().filter_map(|l| l.file_ext()))
        .join(".")
}

/// Base name of a container file, with every known layer suffix removed:
/// `nightly.tar.xz.age` gives `nightly`.
pub fn strip_container_ext(file_name: &str) -> &str {
    let mut base = file_name;
    for ext in ["age", "xz", TAR_FILE_EXT] {
        if let Some(stripped) = base
            .strip_suffix(ext)
            .and_then(|b| b.strip_suffix('.'))
            .filter(|b| !b.is_empty())
        {
            base = stripped;
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::compress::xz::XzConfig;
    use crate::backup::compress::CompressorConfig;
    use crate::backup::encrypt::EncryptorConfig;

    #[test]
    fn test_container_file_ext() {
        let xz = CompressorConfig::Xz(XzConfig::default());
        let age = EncryptorConfig::passphrase("long enough passphrase");
        assert_eq!(container_file_ext(&[]), "tar");
        assert_eq!(container_file_ext(&[&xz, &EncryptorConfig::None]), "tar.xz");
        assert_eq!(container_file_ext(&[&xz, &age]), "tar.xz.age");
        assert_eq!(container_file_ext(&[&CompressorConfig::None, &age]), "tar.age");
    }

    #[test]
    fn test_strip_container_ext() {
        assert_eq!(strip_container_ext("nightly.tar.xz.age"), "nightly");
        assert_eq!(strip_container_ext("nightly.tar.age"), "nightly");
        assert_eq!(strip_container_ext("nightly.tar"), "nightly");
        assert_eq!(strip_container_ext("my.photos.tar.xz"), "my.photos");
        assert_eq!(strip_container_ext("plain"), "plain");
        assert_eq!(strip_container_ext("tar"), "tar");
    }
}
