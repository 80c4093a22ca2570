/// Evaluation limits and switches for a root scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of nested calls before evaluation fails with a stack overflow
    pub max_depth: usize,
    /// Whether the prelude wraps its pure functions in a memoizing cache
    pub memoize_pure: bool,
}

pub const DEFAULT_MAX_DEPTH: usize = 1_000;

impl Default for Config {
    fn default() -> Self {
        Config {
            max_depth: DEFAULT_MAX_DEPTH,
            memoize_pure: false,
        }
    }
}
