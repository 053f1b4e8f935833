//! Stable error codes.
//!
//! Codes are grouped by phase: E1xxx literals, E2xxx types, E3xxx analysis,
//! E4xxx lowering. The code is part of the user-facing contract; messages may
//! change, codes may not.

/// A stable, searchable error code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[allow(non_camel_case_types)]
pub enum ErrorCode {
    // -- literals --
    /// Malformed literal text.
    E1001,
    /// Literal out of range for its type.
    E1002,
    /// Unknown literal suffix.
    E1003,

    // -- type construction --
    /// Invalid by-value recursion in a type.
    E2001,
    /// Vec element must be an integer or float type.
    E2002,
    /// Variant type must have at least one member.
    E2003,
    /// Computed record body element is not a (name, type) pair.
    E2004,
    /// Wrong number of type parameters.
    E2005,

    // -- analysis --
    /// Type mismatch.
    E3001,
    /// Arity mismatch.
    E3002,
    /// Value is not callable.
    E3003,
    /// Ambiguous overload.
    E3004,
    /// No matching overload.
    E3005,
    /// Invalid static object in this position.
    E3006,
    /// Unresolved recursion while inferring return types.
    E3007,
    /// Unknown identifier.
    E3008,
    /// Alias-function recursion limit exceeded.
    E3009,
    /// Static assertion failed.
    E3010,
    /// Cannot take the address of a temporary.
    E3011,

    // -- lowering --
    /// Goto label not found.
    E4001,
    /// Unreachable code after a terminating statement.
    E4002,
    /// Rethrow outside of a catch block.
    E4003,
    /// Not all paths return a value.
    E4004,
    /// Invalid break/continue placement.
    E4005,
    /// Unsupported construct for the target.
    E4006,
    /// Textual backend body failed to parse.
    E4007,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
