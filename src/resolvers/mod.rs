//! Schema resolution stages
//!
//! Each stage consumes the output of the previous one and returns a new
//! value: includes are inlined on the element tree, then the typed schema
//! is made concrete, then narrowed to a phase and a query binding.

mod abstraction;
mod includes;
mod phases;

pub use abstraction::{resolve_abstractions, substitute_params};
pub use includes::{resolve_includes, Fragment, FragmentFetcher, IncludeResolver};
pub use phases::{
    select_binding, select_phase, PhaseSelection, QueryBinding, DEFAULT_QUERY_BINDING, PHASE_ALL,
    PHASE_DEFAULT,
};
