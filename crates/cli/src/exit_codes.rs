//! CLI Exit Code Registry
//!
//! Single source of truth for `cohort` exit codes. Scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | Reserved, never emitted                  |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 3-9     | run              | Pipeline run outcomes                    |
//! | 10-19   | persist          | Group persistence                        |

// =============================================================================
// Universal (0, 2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Usage error - bad arguments, no user source.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Run (3-9)
// =============================================================================

/// Users left ungrouped and `--strict` was given.
pub const EXIT_UNGROUPED: u8 = 3;

/// Pipeline config failed to parse or validate.
pub const EXIT_INVALID_CONFIG: u8 = 4;

/// Runtime failure: unreadable config or users, bad user data, output write.
pub const EXIT_RUNTIME: u8 = 5;

// =============================================================================
// Persist (10-19)
// =============================================================================

/// Database could not be opened or a group could not be saved.
pub const EXIT_PERSIST: u8 = 10;
