//! Procedural macros for statecraft

use darling::{FromDeriveInput, FromField, FromVariant};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Container-level attributes for #[derive(Action)]
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(action), supports(enum_any))]
struct ActionOpts {
    ident: syn::Ident,
    generics: syn::Generics,
    data: darling::ast::Data<ActionVariant, ()>,
}

/// Variant-level attributes
#[derive(Debug, FromVariant)]
#[darling(attributes(action))]
struct ActionVariant {
    ident: syn::Ident,
    fields: darling::ast::Fields<VariantField>,

    /// The reserved initialization action
    #[darling(default)]
    init: bool,

    /// Variant carrying a `Thunk`
    #[darling(default)]
    thunk: bool,
}

#[derive(Debug, FromField)]
struct VariantField {
    ty: syn::Type,
}

/// Container for #[derive(Effect)]
#[derive(Debug, FromDeriveInput)]
#[darling(supports(enum_any, struct_any))]
struct EffectOpts {
    ident: syn::Ident,
    generics: syn::Generics,
    data: darling::ast::Data<EffectVariant, ()>,
}

#[derive(Debug, FromVariant)]
struct EffectVariant {
    ident: syn::Ident,
    fields: darling::ast::Fields<()>,
}

/// Match arm pattern ignoring the variant's fields
fn variant_pattern(
    ty: &syn::Ident,
    variant: &syn::Ident,
    style: darling::ast::Style,
) -> TokenStream2 {
    match style {
        darling::ast::Style::Unit => quote! { #ty::#variant },
        darling::ast::Style::Tuple => quote! { #ty::#variant(..) },
        darling::ast::Style::Struct => quote! { #ty::#variant { .. } },
    }
}

/// Derive macro for the Action trait
///
/// Generates a `name()` method that returns the variant name as a static string.
///
/// Variant attributes:
/// - `#[action(init)]` on one unit variant implements `InitAction`, making it
///   the action stores reduce at construction when given no initial state.
/// - `#[action(thunk)]` on one single-field tuple variant holding a
///   `Thunk<S, Self, E>` implements `ThunkAction`, so `ThunkMiddleware` runs it.
///
/// # Example
/// ```ignore
/// #[derive(Action, Clone, Debug)]
/// enum TodoAction {
///     #[action(init)]
///     Init,
///     Add(String),
///     #[action(thunk)]
///     Run(Thunk<TodoState, TodoAction, TodoEffect>),
/// }
///
/// assert_eq!(TodoAction::Add("milk".into()).name(), "Add");
/// assert!(matches!(TodoAction::init(), TodoAction::Init));
/// ```
#[proc_macro_derive(Action, attributes(action))]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let opts = match ActionOpts::from_derive_input(&input) {
        Ok(opts) => opts,
        Err(e) => return e.write_errors().into(),
    };

    let name = &opts.ident;
    let (impl_generics, ty_generics, where_clause) = opts.generics.split_for_impl();

    let variants = match &opts.data {
        darling::ast::Data::Enum(variants) => variants,
        _ => {
            return syn::Error::new_spanned(&input, "Action can only be derived for enums")
                .to_compile_error()
                .into();
        }
    };

    let name_arms = variants.iter().map(|v| {
        let pattern = variant_pattern(name, &v.ident, v.fields.style);
        let variant_str = v.ident.to_string();
        quote! { #pattern => #variant_str }
    });

    let mut expanded = quote! {
        impl #impl_generics ::statecraft::Action for #name #ty_generics #where_clause {
            fn name(&self) -> &'static str {
                match self {
                    #(#name_arms),*
                }
            }
        }
    };

    let init_variants: Vec<_> = variants.iter().filter(|v| v.init).collect();
    match init_variants.as_slice() {
        [] => {}
        [v] if v.fields.style == darling::ast::Style::Unit => {
            let variant = &v.ident;
            expanded = quote! {
                #expanded

                impl #impl_generics ::statecraft::InitAction for #name #ty_generics #where_clause {
                    fn init() -> Self {
                        #name::#variant
                    }
                }
            };
        }
        [v] => {
            return syn::Error::new_spanned(&v.ident, "#[action(init)] requires a unit variant")
                .to_compile_error()
                .into();
        }
        [_, v, ..] => {
            return syn::Error::new_spanned(
                &v.ident,
                "only one variant can be marked #[action(init)]",
            )
            .to_compile_error()
            .into();
        }
    }

    let thunk_variants: Vec<_> = variants.iter().filter(|v| v.thunk).collect();
    match thunk_variants.as_slice() {
        [] => {}
        [v] if v.fields.style == darling::ast::Style::Tuple && v.fields.len() == 1 => {
            let variant = &v.ident;
            let thunk_ty = &v.fields.fields[0].ty;
            expanded = quote! {
                #expanded

                impl #impl_generics ::statecraft::ThunkAction for #name #ty_generics #where_clause {
                    type State = <#thunk_ty as ::statecraft::ThunkParts>::State;
                    type Effect = <#thunk_ty as ::statecraft::ThunkParts>::Effect;

                    #[allow(unreachable_patterns)]
                    fn into_thunk(
                        self,
                    ) -> ::core::result::Result<
                        ::statecraft::Thunk<Self::State, Self, Self::Effect>,
                        Self,
                    > {
                        match self {
                            #name::#variant(thunk) => ::core::result::Result::Ok(thunk),
                            other => ::core::result::Result::Err(other),
                        }
                    }
                }
            };
        }
        [v] => {
            return syn::Error::new_spanned(
                &v.ident,
                "#[action(thunk)] requires a tuple variant with exactly one field",
            )
            .to_compile_error()
            .into();
        }
        [_, v, ..] => {
            return syn::Error::new_spanned(
                &v.ident,
                "only one variant can be marked #[action(thunk)]",
            )
            .to_compile_error()
            .into();
        }
    }

    TokenStream::from(expanded)
}

/// Derive macro for the Effect trait
///
/// On an enum, `name()` returns the variant name. On a struct it returns the
/// struct name.
///
/// ```ignore
/// #[derive(Effect, Debug)]
/// enum UiEffect {
///     Toast(String),
///     ScrollToTop,
/// }
///
/// assert_eq!(UiEffect::ScrollToTop.name(), "ScrollToTop");
/// ```
#[proc_macro_derive(Effect)]
pub fn derive_effect(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let opts = match EffectOpts::from_derive_input(&input) {
        Ok(opts) => opts,
        Err(e) => return e.write_errors().into(),
    };

    let name = &opts.ident;
    let (impl_generics, ty_generics, where_clause) = opts.generics.split_for_impl();

    let body = match &opts.data {
        darling::ast::Data::Enum(variants) if variants.is_empty() => quote! { match *self {} },
        darling::ast::Data::Enum(variants) => {
            let arms = variants.iter().map(|v| {
                let pattern = variant_pattern(name, &v.ident, v.fields.style);
                let variant_str = v.ident.to_string();
                quote! { #pattern => #variant_str }
            });
            quote! {
                match self {
                    #(#arms),*
                }
            }
        }
        darling::ast::Data::Struct(_) => {
            let name_str = name.to_string();
            quote! { #name_str }
        }
    };

    let expanded = quote! {
        impl #impl_generics ::statecraft::Effect for #name #ty_generics #where_clause {
            fn name(&self) -> &'static str {
                #body
            }
        }
    };

    TokenStream::from(expanded)
}
