//! Template system: entities, references and their resolution
//!
//! A consuming document points at a stored template through a reference node:
//!
//! ```text
//! stage:
//!   identifier: deploy_prod
//!   template:
//!     templateRef: deploy
//!     templateInputs:
//!       spec:
//!         env: prod
//! ```
//!
//! Resolution replaces the reference node with the template's `spec` skeleton, with
//! the supplied inputs merged into its `<+input>` placeholders.

mod cache;
mod entity;
mod merge;
mod reference;
mod repository;
mod resolver;

pub use cache::{FetchBatcher, ResolutionCache};
pub use entity::{
    EntityType, EntityTypeDescriptor, FamilyKey, Scope, ScopeLevel, TemplateEntity, TemplateError,
    TemplateKey,
};
pub use merge::{input_schema, merge_inputs, retain_variables};
pub use reference::{
    is_referencing_object, reference_nodes, TemplateReference, TemplateReferenceSummary,
    TEMPLATE_INPUTS, TEMPLATE_REF, VERSION_LABEL,
};
pub use repository::{BatchFetch, RepositoryError, TemplateRepository};
pub use resolver::{Resolution, ResolutionContext, ResolveOptions, Resolver};
