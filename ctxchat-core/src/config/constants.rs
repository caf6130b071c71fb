//! Shared constants: budget defaults, endpoints, and wire-level names.

pub mod defaults {
    /// Hard ceiling on context tokens per outgoing request.
    pub const MAX_CONTEXT_TOKENS: usize = 30_720;

    /// Coarse upper-bound characters-per-token ratio for local estimates.
    pub const CHARS_PER_TOKEN: usize = 4;

    /// Generous pre-trim target for the degraded assembly path.
    pub const APPROXIMATE_TOKEN_CEILING: usize = 48_000;

    /// Uncached token lookups tolerated per assembly before switching to
    /// the approximate-then-binary-search path.
    pub const CACHE_MISS_THRESHOLD: usize = 20;
}

pub mod models {
    pub const GEMINI_FLASH: &str = "gemini-1.5-flash";
    pub const GEMINI_PRO: &str = "gemini-1.5-pro";

    pub const DEFAULT_MODEL: &str = GEMINI_FLASH;
}

pub mod env_vars {
    pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
}

pub mod urls {
    pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
}

pub mod message_roles {
    pub const USER: &str = "user";
    pub const MODEL: &str = "model";
}

pub mod sentinels {
    /// Stored and surfaced in place of a reply the backend refused to produce.
    pub const BLOCKED_RESPONSE: &str = "[response blocked by safety settings]";
}
