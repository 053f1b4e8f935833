//! The semantic middle-end of the Mica compiler.
//!
//! This crate owns the type universe (construction, hash-consing, layout,
//! recursion checks), static objects and compile-time value holders, lexical
//! environments, the static evaluator, the expression analyzer, and the
//! specialization (invoke) engine. Field materialization, static evaluation,
//! and analysis are mutually recursive, which is why they share a crate.
//!
//! The lowering driver in `mica_lower` consumes everything here; the backend
//! model in `mica_backend` answers layout queries.

mod analyzer;
mod context;
mod env;
mod error;
mod eval;
mod fields;
mod layout;
mod literals;
mod object;
mod pattern;
mod primops;
mod store;
#[cfg(test)]
mod testutil;
mod types;
mod value;

pub mod invoke;

pub use analyzer::{
    analyze_call_by_name, analyze_call_object, analyze_callable_body, analyze_dispatch,
    analyze_dispatch_index, analyze_entry, analyze_expr, analyze_gvar_instance, analyze_multi,
    analyze_multi_args, analyze_one, analyze_return, analyze_static_object, bind_call_by_name_args,
    compute_args_key, external_signature, return_kind_to_by_ref, safe_analyze_multi,
    safe_analyze_one, AnalysisContext, StatementAnalysis,
};
pub use context::{CachingDisabler, Compilation, GVarInstance};
pub use env::Env;
pub use error::{SemaError, SemaResult};
pub use eval::{static_tuple_elements, type_bool_kind, unwrap_static_type, BoolKind};
pub use fields::RecordFields;
pub use layout::Layout;
pub use literals::{decode_float_literal, decode_int_literal};
pub use object::{Object, ValueHolder};
pub use pattern::{evaluate_pattern, unify, Bindings, Pattern};
pub use primops::{analyze_prim_op, ordering_selector, prim_static_arg, rmw_selector};
pub use store::{TypeFlags, TypeStore};
pub use types::{DeclPtr, TypeData};
pub use value::{CValue, MultiCValue, MultiPValue, PValue};
