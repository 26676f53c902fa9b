#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Templates resolves reference expressions embedded in a resource's built manifest (§4.7) and
//! emits a composition as a `ResourceGraphDefinition` document, or applies one directly against
//! already-resolved values.

mod rgd;
mod substitute;

pub use rgd::{emit_rgd, RgdError, EXTERNAL_RECONCILER_API_VERSION};
pub use substitute::{resolve_for_cel, resolve_for_direct, TemplateError};
