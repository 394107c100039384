//! Request path resolution
//!
//! `/logs/<index>[/<type>]` and `/async-logs/<index>[/<type>]` name the
//! destination; the index is lower-cased and the type defaults to
//! [`DEFAULT_TYPE`]. Paths are cleaned first, so extraneous slashes and dot
//! segments are tolerated.

use thiserror::Error;

use crate::types::DEFAULT_TYPE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("'{0}' is not a valid action, only logs and async-logs are allowed")]
    BadAction(String),
    #[error("path '{0}' must be in the form /logs/<index>[/<type>]")]
    BadShape(String),
}

/// Resolve a request path into `(index, type)`
pub fn resolve(location: &str) -> Result<(String, String), PathError> {
    let parts = clean(location);
    let action = parts.first().map(String::as_str).unwrap_or("");
    if action != "logs" && action != "async-logs" {
        return Err(PathError::BadAction(action.to_string()));
    }
    match parts.len() {
        2 => Ok((parts[1].to_lowercase(), DEFAULT_TYPE.to_string())),
        3 => Ok((parts[1].to_lowercase(), parts[2].clone())),
        _ => Err(PathError::BadShape(location.to_string())),
    }
}

/// Split a path into segments, dropping empties and resolving `.`/`..`
fn clean(location: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for segment in location.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s.to_string()),
        }
    }
    out
}
