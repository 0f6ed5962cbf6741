//! Shared key generation for storage backends.
//!
//! Key format: `{dir}/{name}` with surrounding slashes trimmed from `dir`.

use url::{ParseError, Url};

use crate::traits::{StorageError, StorageResult};

/// Build the storage key for `(dir, name)`.
///
/// Rejects empty names, names containing a path separator, and any `..` segment
/// so a key can never address something outside the backend's root.
pub fn object_key(dir: &str, name: &str) -> StorageResult<String> {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(StorageError::InvalidKey(format!(
            "invalid file name '{}'",
            name
        )));
    }

    let dir = dir.trim_matches('/');
    let key = if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    };

    if key.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }

    Ok(key)
}

/// Percent-encode every segment of a key for use in a URL path.
pub fn url_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Replace the scheme and authority of `url` with `host`, keeping path, query
/// and fragment. A path on `host` is prepended to the original path.
///
/// `host` may be given with or without a scheme; without one, the scheme of
/// `url` is kept. A relative `url` is treated as https.
pub fn rebase_on_host(url: &str, host: &str) -> StorageResult<String> {
    let original = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(ParseError::RelativeUrlWithoutBase) => Url::parse("https://localhost/")
            .and_then(|base| base.join(url))
            .map_err(|e| invalid_url("URL", url, e))?,
        Err(e) => return Err(invalid_url("URL", url, e)),
    };

    let host_url = if host.contains("://") {
        host.to_string()
    } else {
        format!("{}://{}", original.scheme(), host)
    };
    let mut rebased = Url::parse(&host_url).map_err(|e| invalid_url("assets host", host, e))?;

    let path = format!("{}{}", rebased.path().trim_end_matches('/'), original.path());
    rebased.set_path(&path);
    rebased.set_query(original.query());
    rebased.set_fragment(original.fragment());

    Ok(rebased.into())
}

fn invalid_url(what: &str, value: &str, e: ParseError) -> StorageError {
    StorageError::ConfigError(format!("Invalid {} '{}': {}", what, value, e))
}
