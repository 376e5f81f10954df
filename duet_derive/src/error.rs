//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations from
//! one `#[error("...")]` message per variant.
//!
//! # Usage
//!
//! ```ignore
//! use duet_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum ExecError {
//!     #[error("bad register {0}")]
//!     BadRegister(char),
//!
//!     #[error("division by zero at ip {ip}")]
//!     DivisionByZero { ip: usize, opcode: u8 },
//!
//!     #[error("queue closed")]
//!     Closed,
//! }
//! ```
//!
//! Only the fields a message actually names are passed to `write!`, so a
//! variant may carry context that its message leaves out (`opcode` above).

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, Lit, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Enum(data) => {
            let arms = data
                .variants
                .iter()
                .map(|variant| {
                    let ident = &variant.ident;
                    let message = message_of(&variant.attrs, ident)?;
                    let (pattern, write) = display_fields(&variant.fields, &message);
                    Ok(quote! { Self::#ident #pattern => #write, })
                })
                .collect::<syn::Result<Vec<_>>>()?;

            if arms.is_empty() {
                quote! { match *self {} }
            } else {
                quote! { match self { #(#arms)* } }
            }
        }
        Data::Struct(data) => {
            let message = message_of(&input.attrs, name)?;
            let (pattern, write) = display_fields(&data.fields, &message);
            quote! {
                let Self #pattern = self;
                #write
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Builds the destructuring pattern and the `write!` call for one set of fields.
fn display_fields(fields: &Fields, message: &str) -> (TokenStream2, TokenStream2) {
    match fields {
        Fields::Unit => (quote! {}, quote! { f.write_str(#message) }),
        Fields::Named(named) => {
            let used: Vec<_> = named
                .named
                .iter()
                .filter_map(|field| field.ident.as_ref())
                .filter(|ident| references(message, &ident.to_string()))
                .collect();
            (
                quote! { { #(#used,)* .. } },
                quote! { write!(f, #message, #(#used = #used),*) },
            )
        }
        Fields::Unnamed(unnamed) => {
            let count = unnamed.unnamed.len();
            let mut format = message.to_string();
            let mut bindings = Vec::with_capacity(count);
            let mut used = Vec::new();
            for i in 0..count {
                let positional = i.to_string();
                if references(message, &positional) {
                    let ident = format_ident!("f{}", i);
                    format = format
                        .replace(&format!("{{{i}}}"), &format!("{{{ident}}}"))
                        .replace(&format!("{{{i}:"), &format!("{{{ident}:"));
                    bindings.push(ident.to_token_stream());
                    used.push(ident);
                } else {
                    bindings.push(quote! { _ });
                }
            }
            (
                quote! { ( #(#bindings),* ) },
                quote! { write!(f, #format, #(#used = #used),*) },
            )
        }
    }
}

/// Returns true if `message` interpolates the argument `name` (`{name}` or `{name:...}`).
fn references(message: &str, name: &str) -> bool {
    message.contains(&format!("{{{name}}}")) || message.contains(&format!("{{{name}:"))
}

/// Extracts the string literal from an `#[error("...")]` attribute.
fn message_of<T: ToTokens>(attrs: &[Attribute], target: &T) -> syn::Result<String> {
    let attr = attrs
        .iter()
        .find(|attr| attr.path().is_ident("error"))
        .ok_or_else(|| {
            syn::Error::new_spanned(
                target,
                "missing #[error(\"...\")] attribute; every error variant must declare a display message",
            )
        })?;

    let Meta::List(list) = &attr.meta else {
        return Err(syn::Error::new_spanned(
            &attr.meta,
            "invalid #[error] attribute; use #[error(\"message\")]",
        ));
    };

    match syn::parse2::<Lit>(list.tokens.clone()) {
        Ok(Lit::Str(lit)) => Ok(lit.value()),
        _ => Err(syn::Error::new_spanned(
            &attr.meta,
            "#[error] expects a single string literal, e.g. #[error(\"division by zero at ip {ip}\")]",
        )),
    }
}
