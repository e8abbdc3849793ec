use std::path::PathBuf;

pub const FILE_URI_PREFIX: &str = "file://";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathResolutionError {
    #[error("module location is empty")]
    Empty,
    #[error("file uri `{0}` does not name a path")]
    MissingPath(String),
    #[error("file uri `{uri}` has invalid percent-encoding: {reason}")]
    InvalidEncoding { uri: String, reason: String },
    #[error("module location `{0}` contains a NUL byte")]
    NulByte(String),
}

/// Turns a module location descriptor into a filesystem path.
///
/// `file://` URIs lose their scheme. A `/C:` style remainder becomes a drive
/// path, any other leading `/` stays a POSIX absolute path, and a remainder
/// without a leading slash names a share (`//server/share/...`). Anything that
/// is not a file URI is already a path and comes back as given.
pub fn resolve(location: &str) -> Result<PathBuf, PathResolutionError> {
    if location.is_empty() {
        return Err(PathResolutionError::Empty);
    }
    if location.contains('\0') {
        return Err(PathResolutionError::NulByte(location.to_string()));
    }

    let Some(rest) = strip_file_scheme(location) else {
        return Ok(PathBuf::from(location));
    };
    if rest.is_empty() {
        return Err(PathResolutionError::MissingPath(location.to_string()));
    }

    let decoded =
        urlencoding::decode(rest).map_err(|err| PathResolutionError::InvalidEncoding {
            uri: location.to_string(),
            reason: err.to_string(),
        })?;
    if decoded.contains('\0') {
        return Err(PathResolutionError::NulByte(location.to_string()));
    }

    let path = match decoded.strip_prefix('/') {
        Some(after) if starts_with_drive(after) => after.to_string(),
        Some(_) => decoded.into_owned(),
        None => format!("//{decoded}"),
    };
    Ok(PathBuf::from(path))
}

pub fn is_file_uri(location: &str) -> bool {
    strip_file_scheme(location).is_some()
}

fn strip_file_scheme(location: &str) -> Option<&str> {
    let scheme = location.get(..FILE_URI_PREFIX.len())?;
    if scheme.eq_ignore_ascii_case(FILE_URI_PREFIX) {
        location.get(FILE_URI_PREFIX.len()..)
    } else {
        None
    }
}

fn starts_with_drive(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_uri_drops_single_leading_slash() {
        assert_eq!(
            resolve("file:///C:/dir/file.dll").expect("resolve"),
            PathBuf::from("C:/dir/file.dll")
        );
        assert_eq!(
            resolve("FILE:///d:/x.dll").expect("resolve"),
            PathBuf::from("d:/x.dll")
        );
    }

    #[test]
    fn share_uri_gains_double_slash() {
        assert_eq!(
            resolve("file://server/share/file.dll").expect("resolve"),
            PathBuf::from("//server/share/file.dll")
        );
    }

    #[test]
    fn posix_uri_keeps_leading_slash() {
        assert_eq!(
            resolve("file:///home/ci/suite.dll").expect("resolve"),
            PathBuf::from("/home/ci/suite.dll")
        );
    }

    #[test]
    fn escaped_characters_are_decoded() {
        assert_eq!(
            resolve("file:///opt/my%20tests/suite.dll").expect("resolve"),
            PathBuf::from("/opt/my tests/suite.dll")
        );
    }

    #[test]
    fn plain_paths_are_returned_unchanged() {
        for raw in ["/tmp/suite.dll", "C:\\dir\\file.dll", "relative/suite.dll", "http://x/y"] {
            assert_eq!(resolve(raw).expect("resolve"), PathBuf::from(raw));
        }
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        assert_eq!(resolve(""), Err(PathResolutionError::Empty));
        assert!(matches!(
            resolve("file://"),
            Err(PathResolutionError::MissingPath(_))
        ));
        assert!(matches!(
            resolve("file:///tmp/%FF%FE.dll"),
            Err(PathResolutionError::InvalidEncoding { .. })
        ));
        assert!(matches!(
            resolve("file:///tmp/a%00b"),
            Err(PathResolutionError::NulByte(_))
        ));
    }
}
