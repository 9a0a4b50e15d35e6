//! Function name extraction from request paths.

use crate::error::{ProviderError, ProviderResult};
use crate::function::validate_function_name;

/// Pulls the target function name out of a request path.
pub trait FunctionNameExtractor: Send + Sync + std::fmt::Debug {
    /// The validated function name addressed by `path`.
    ///
    /// # Errors
    ///
    /// `MissingFunctionName` when the path carries no name and
    /// `InvalidFunctionName` when the name is not DNS-safe.
    fn extract(&self, path: &str) -> ProviderResult<String>;
}

/// Takes the first segment after one of a fixed set of route prefixes.
#[derive(Debug, Clone)]
pub struct RoutePrefixExtractor {
    prefixes: Vec<&'static str>,
}

impl RoutePrefixExtractor {
    pub fn new(prefixes: Vec<&'static str>) -> Self {
        Self { prefixes }
    }
}

impl Default for RoutePrefixExtractor {
    fn default() -> Self {
        Self::new(vec![
            "/function/",
            "/system/function/",
            "/system/scale-function/",
        ])
    }
}

impl FunctionNameExtractor for RoutePrefixExtractor {
    fn extract(&self, path: &str) -> ProviderResult<String> {
        let rest = self
            .prefixes
            .iter()
            .find_map(|prefix| {
                path.strip_prefix(prefix)
                    .or_else(|| (path == prefix.trim_end_matches('/')).then_some(""))
            })
            .ok_or(ProviderError::MissingFunctionName)?;

        let name = rest.split('/').next().unwrap_or_default();
        if name.is_empty() {
            return Err(ProviderError::MissingFunctionName);
        }

        validate_function_name(name)?;
        Ok(name.to_owned())
    }
}
