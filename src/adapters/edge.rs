//! Edge runtime: the platform owns the socket and calls into the router.

use super::{Deployment, mount_dev};
use crate::app::{AppContext, ServerOptions, assemble};
use crate::error::AdapterError;

/// Assemble the app and return it. Upgrade handlers registered through the
/// capability are answered by a layer inside the router itself.
pub fn create_edge_app(ctx: AppContext, options: ServerOptions) -> Result<Deployment, AdapterError> {
    let app = assemble(&ctx, &options);
    if ctx.mode.is_development() {
        return mount_dev(&ctx, app);
    }
    Ok(Deployment::App(app))
}
