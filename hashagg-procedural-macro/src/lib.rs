//! Procedural macros used by the `hashagg` crate

use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derive `fn metrics_set(&self) -> MetricsSet` for the metrics struct of an operator.
///
/// Each field of the struct must be one of the metric types defined in
/// `crate::exec::metric` (`Count`, `Time`, `Gauge`). The snapshot maps the name of the
/// field to the value of the metric
#[proc_macro_derive(MetricsSetBuilder)]
pub fn metrics_set_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(expanded) => expanded.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(
            input.span(),
            "MetricsSetBuilder can only be derived for structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new(
            data.fields.span(),
            "MetricsSetBuilder requires named fields",
        ));
    };

    let inserts = fields.named.iter().filter_map(|field| {
        let ident = field.ident.as_ref()?;
        let metric_type = &field.ty;
        Some(quote! {
            metrics.insert(
                stringify!(#ident),
                crate::exec::metric::MetricValue::#metric_type(self.#ident.value()),
            );
        })
    });

    let name = &input.ident;
    Ok(quote! {
        impl #name {
            /// Snapshot of the metrics
            pub fn metrics_set(&self) -> crate::exec::metric::MetricsSet {
                let mut metrics = ::std::collections::BTreeMap::new();
                #(#inserts)*
                crate::exec::metric::MetricsSet {
                    name: stringify!(#name),
                    metrics,
                }
            }
        }
    })
}
