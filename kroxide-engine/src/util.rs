//! Util holds the generic read-then-create-or-replace apply primitive the deployer builds on
//! (§4.3.3: "Apply via read-then-create-or-replace: read the object; if absent (404), create; if
//! present, `replace` carrying over `resourceVersion`").

use kube::api::{Api, DynamicObject, PatchParams, PostParams};
use kube::core::ApiResource;
use kube::ResourceExt;
use tracing::{instrument, trace};

use crate::Result;

static FIELD_MANAGER: &str = "kroxide";

/// Apply_dynamic reads `obj`'s named counterpart; if absent, creates it; if present, replaces it
/// carrying over the observed `resourceVersion`, mirroring the teacher's `check_owned_resource`
/// get-then-create-or-patch shape generalised over any kind.
#[instrument(skip(api, obj), fields(kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default(), name = obj.name_any()))]
pub async fn apply_dynamic(api: &Api<DynamicObject>, obj: &DynamicObject) -> Result<DynamicObject> {
    let name = obj.name_any();
    match api.get_opt(&name).await? {
        Some(current) => {
            trace!("replacing existing resource");
            let mut next = obj.clone();
            next.metadata.resource_version = current.metadata.resource_version.clone();
            Ok(api.replace(&name, &PostParams::default(), &next).await?)
        }
        None => {
            trace!("creating new resource");
            Ok(api.create(&PostParams::default(), obj).await?)
        }
    }
}

/// Dynamic_api builds a kind-agnostic [`Api`] for `resource`, namespaced if `namespace` is given.
pub fn dynamic_api(client: kube::Client, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
    match namespace {
        Some(ns) => Api::namespaced_with(client, ns, resource),
        None => Api::all_with(client, resource),
    }
}

/// Default_patch_params returns the apply-patch parameters the engine uses for status subresource
/// writes (§4.5), field-managed under [`FIELD_MANAGER`].
pub fn default_patch_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER)
}
