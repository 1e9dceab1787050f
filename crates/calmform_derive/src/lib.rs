use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use proc_macro_crate::{FoundCrate, crate_name};
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Generates `{Model}Fields` with one typed `FieldId` accessor per named
/// field, and a `FormSchema` implementation for the model.
#[proc_macro_derive(FormFields)]
pub fn derive_form_fields(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    if !input.generics.params.is_empty() {
        return syn::Error::new_spanned(
            input.ident,
            "FormFields derive supports only non-generic structs",
        )
        .to_compile_error()
        .into();
    }

    let model_ident = input.ident;
    let fields_struct_ident = format_ident!("{model_ident}Fields");

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields.named,
            _ => {
                return syn::Error::new(
                    Span::call_site(),
                    "FormFields derive requires a struct with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new(
                Span::call_site(),
                "FormFields derive is only supported on structs",
            )
            .to_compile_error()
            .into();
        }
    };

    let calmform = calmform_path();
    let mut accessors = Vec::new();
    let mut registrations = Vec::new();
    let mut readers = Vec::new();

    for field in named_fields {
        let Some(field_ident) = field.ident else {
            continue;
        };
        let field_ty = field.ty;
        let field_name = field_ident.to_string();
        let field_path = field_name.strip_prefix("r#").unwrap_or(&field_name).to_owned();

        accessors.push(quote! {
            pub fn #field_ident(&self) -> #calmform::form::FieldId<#field_ty> {
                #calmform::form::FieldId::new(#field_path)
            }
        });

        registrations.push(quote! {
            form.register(
                #calmform::form::FieldDefinition::new(&fields.#field_ident())
                    .initial_value(::core::clone::Clone::clone(&self.#field_ident)),
            )?;
        });

        readers.push(quote! {
            #field_ident: values.get(&fields.#field_ident())?,
        });
    }

    quote! {
        #[derive(Clone, Copy, Debug, Default)]
        pub struct #fields_struct_ident;

        impl #fields_struct_ident {
            #(#accessors)*
        }

        impl #calmform::form::FormSchema for #model_ident {
            type Fields = #fields_struct_ident;

            fn fields() -> Self::Fields {
                #fields_struct_ident
            }

            fn register(
                &self,
                form: &#calmform::form::FormController,
            ) -> #calmform::form::FormResult<()> {
                let fields = #fields_struct_ident;
                #(#registrations)*
                ::core::result::Result::Ok(())
            }

            fn from_values(values: &#calmform::form::FormValues) -> ::core::option::Option<Self> {
                let fields = #fields_struct_ident;
                ::core::option::Option::Some(Self {
                    #(#readers)*
                })
            }
        }
    }
    .into()
}

fn calmform_path() -> TokenStream2 {
    match crate_name("calmform") {
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Ok(FoundCrate::Itself) => quote!(crate),
        Err(_) => quote!(::calmform),
    }
}
