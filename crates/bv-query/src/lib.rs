//! Query compilation for the bioview toolkit.
//!
//! Turns the scattered filter/sort/paging state a page holds into
//! well-formed search backend requests: field resolution (including
//! the special pseudo-fields), free-text date filters, the filter
//! compiler and the aggregation planner.

pub mod aggregation;
pub mod dates;
pub mod fields;
pub mod filter;
pub mod fragments;

// Re-export commonly used types
pub use aggregation::{plan_composite, plan_term, TermPlan, DOWNLOAD_COMPOSITE_PAGE_SIZE};
pub use fields::{
    composite_key_name, field_with_keyword_suffix, parse_field, readable_key_name,
    simple_field_name, ColumnDef, FieldResolver, ParsedField, SpecialField,
};
pub use filter::{
    compile, CompileOutcome, ControlKind, FieldMappingType, GroupScope, InvalidInput,
    ParameterControl, PermissionsSelection, QueryContext, SourceRuntime, UserFilterSelection,
};
pub use fragments::{build_query_fragment, expand_sort, QueryFragment};
