//! Small attribute macro, trimmed down from a much larger
//! capability-delegation machinery (`delegate_connector`/
//! `delegate_all_providers`) that generated per-capability passthrough
//! impls for a multi-provider connector trait. The gateway has a single
//! narrow `RequestHandler` trait with one method, so all that remains
//! worth generating is the passthrough `handle` body for middleware
//! structs that wrap an inner handler and only override part of the
//! pipeline.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{ItemImpl, parse_macro_input};

/// Generate a `RequestHandler` impl that forwards `handle` to the named
/// inner field.
///
/// ```ignore
/// #[vortex_macros::delegate_request_handler(inner)]
/// impl RequestHandler for PassThroughMiddleware {}
/// ```
#[proc_macro_attribute]
pub fn delegate_request_handler(attr: TokenStream, item: TokenStream) -> TokenStream {
    let field = parse_macro_input!(attr as syn::Ident);
    let input = parse_macro_input!(item as ItemImpl);
    let self_ty = &input.self_ty;
    let generated: TokenStream2 = quote! {
        #[async_trait::async_trait]
        impl vortex_core::middleware::RequestHandler for #self_ty {
            async fn handle(
                &self,
                req: vortex_core::middleware::GatewayRequest,
            ) -> Result<serde_json::Value, vortex_types::GatewayError> {
                self.#field.handle(req).await
            }
        }
    };
    generated.into()
}
