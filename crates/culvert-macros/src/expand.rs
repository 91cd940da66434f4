//! Token generation for `#[service]` and `#[interface]`.
//!
//! Generated code only names items through `::culvert`, so the user crate needs
//! nothing else in scope.

use proc_macro2::TokenStream;
use quote::format_ident;
use quote::quote;
use syn::Ident;
use syn::LitStr;
use syn::TraitItem;
use syn::Type;

use crate::parse::Method;
use crate::parse::Parsed;

pub fn service(parsed: &Parsed) -> TokenStream {
    let item = &parsed.item;
    let vis = &item.vis;
    let trait_ident = &item.ident;
    let proxy = format_ident!("{}Proxy", trait_ident);
    let wire_name = trait_ident.to_string();

    let identity = interface_impls(parsed);
    let forwards = parsed
        .methods
        .iter()
        .enumerate()
        .map(|(index, method)| forward(trait_ident, index, method));
    let shapes = parsed.methods.iter().map(method_shape);
    let entries = parsed.methods.iter().map(|method| method_entry(trait_ident, method));

    quote! {
        #[::culvert::async_trait]
        #item

        #identity

        /// Forwards every call to a dispatch function.
        #vis struct #proxy<M: ::culvert::proxy::Metadata> {
            dispatch: ::culvert::proxy::Dispatch<M>,
            metadata: M,
        }

        impl<M: ::culvert::proxy::Metadata> #proxy<M> {
            pub fn new(dispatch: ::culvert::proxy::Dispatch<M>, metadata: M) -> Self {
                Self { dispatch, metadata }
            }
        }

        #[::culvert::async_trait]
        impl<M: ::culvert::proxy::Metadata> #trait_ident for #proxy<M> {
            #(#forwards)*
        }

        impl ::culvert::proxy::Service for dyn #trait_ident {
            fn shape() -> &'static ::culvert::method::ServiceShape {
                static SHAPE: ::std::sync::OnceLock<::culvert::method::ServiceShape> = ::std::sync::OnceLock::new();
                SHAPE.get_or_init(|| {
                    ::culvert::method::ServiceShape::new(
                        <dyn #trait_ident as ::culvert::proxy::Interface>::descriptor(),
                        #wire_name,
                        ::std::vec![#(#shapes),*],
                    )
                })
            }

            #[allow(unused_mut)]
            fn method_table() -> ::culvert::method::Result<::culvert::method::MethodTable<Self>> {
                let mut table = ::culvert::method::MethodTable::<Self>::new(
                    <dyn #trait_ident as ::culvert::proxy::Interface>::descriptor(),
                );
                #(#entries)*
                ::core::result::Result::Ok(table)
            }

            fn proxy<M: ::culvert::proxy::Metadata>(
                dispatch: ::culvert::proxy::Dispatch<M>,
                metadata: M,
            ) -> ::std::sync::Arc<Self> {
                ::std::sync::Arc::new(#proxy::new(dispatch, metadata))
            }
        }
    }
}

pub fn interface(parsed: &Parsed) -> TokenStream {
    let item = &parsed.item;
    let has_async = item
        .items
        .iter()
        .any(|i| matches!(i, TraitItem::Fn(f) if f.sig.asyncness.is_some()));
    let async_trait = has_async.then(|| quote!(#[::culvert::async_trait]));
    let identity = interface_impls(parsed);

    quote! {
        #async_trait
        #item

        #identity
    }
}

fn interface_impls(parsed: &Parsed) -> TokenStream {
    let trait_ident = &parsed.item.ident;
    let identity = &parsed.identity;
    let default_name = trait_ident.to_string();

    let name = literal_or(&identity.name, quote!(#default_name));
    let module = literal_or(&identity.module, quote!(::core::env!("CARGO_PKG_NAME")));
    let version = literal_or(&identity.version, quote!(::core::env!("CARGO_PKG_VERSION")));
    let culture = literal_or(&identity.culture, quote!("neutral"));
    let key_token = literal_or(&identity.key_token, quote!("null"));

    quote! {
        impl ::culvert::proxy::Interface for dyn #trait_ident {
            fn descriptor() -> ::culvert::TypeDescriptor {
                ::culvert::TypeDescriptor::new(
                    #name,
                    ::culvert::ModuleIdentity::new(#module, #version, #culture, #key_token),
                )
            }

            fn interface_name() -> &'static str {
                ::core::concat!(::core::module_path!(), "::", #default_name)
            }
        }

        impl<T: #trait_ident + 'static> ::culvert::proxy::Upcast<T> for dyn #trait_ident {
            fn upcast(this: ::std::sync::Arc<T>) -> ::std::sync::Arc<Self> {
                this
            }
        }
    }
}

fn literal_or(literal: &Option<LitStr>, default: TokenStream) -> TokenStream {
    match literal {
        Some(literal) => quote!(#literal),
        None => default,
    }
}

/// The proxy's body for one method.
fn forward(trait_ident: &Ident, index: usize, method: &Method) -> TokenStream {
    let sig = &method.signature;
    let names = method.arguments.iter().map(|(ident, _)| ident);
    let complete = match &method.output {
        Some(ty) => quote! {
            ::core::result::Result::Ok(completion.value::<#ty>().await?)
        },
        None => quote! {
            completion.void().await?;
            ::core::result::Result::Ok(())
        },
    };

    quote! {
        #sig {
            let invocation = ::culvert::proxy::Invocation::new(
                <dyn #trait_ident as ::culvert::proxy::Service>::shape(),
                #index,
                ::std::vec![#(::culvert::proxy::Argument::new(#names)),*],
            );
            let completion = (self.dispatch)(invocation, ::core::clone::Clone::clone(&self.metadata))?;
            #complete
        }
    }
}

fn descriptors(types: &[&Type]) -> TokenStream {
    quote! {
        ::std::vec![#(<#types as ::culvert::wire::WireType>::descriptor()),*]
    }
}

fn method_shape(method: &Method) -> TokenStream {
    let name = method.ident.to_string();
    let types: Vec<&Type> = method.arguments.iter().map(|(_, ty)| ty).collect();
    let parameters = descriptors(&types);
    let result = match &method.output {
        Some(ty) => quote! {
            ::core::option::Option::Some(::culvert::outcome::ResultType::of::<#ty>())
        },
        None => quote!(::core::option::Option::None),
    };
    quote! {
        ::culvert::method::MethodShape::new(#name, #parameters, #result)
    }
}

/// Registers one method in `table`: a decoder for its arguments and an invoker.
fn method_entry(trait_ident: &Ident, method: &Method) -> TokenStream {
    let name = method.ident.to_string();
    let ident = &method.ident;
    let types: Vec<&Type> = method.arguments.iter().map(|(_, ty)| ty).collect();
    let count = types.len();
    let indices = 0..count;
    let bindings: Vec<Ident> = (0..count).map(|i| format_ident!("__arg{}", i)).collect();
    let parameters = descriptors(&types);

    let invoke = match &method.output {
        Some(ty) => quote! {
            let value = service.#ident(#(#bindings),*).await?;
            ::core::result::Result::Ok::<_, ::culvert::anyhow::Error>(
                ::culvert::method::Returned::encode::<#ty>(&serialiser, &value)?,
            )
        },
        None => quote! {
            service.#ident(#(#bindings),*).await?;
            ::core::result::Result::Ok::<_, ::culvert::anyhow::Error>(::culvert::method::Returned::Void)
        },
    };

    quote! {
        {
            #[allow(unused_variables)]
            fn decode(
                serialiser: &::culvert::serialiser::Serialiser,
                arguments: &[::std::vec::Vec<u8>],
            ) -> ::culvert::method::Result<::culvert::method::DecodedArgs> {
                ::culvert::method::expect_arity(arguments, #count)?;
                ::core::result::Result::Ok(::culvert::method::DecodedArgs::new((
                    #(::culvert::method::decode_argument::<#types>(serialiser, arguments, #indices)?,)*
                )))
            }

            #[allow(unused_variables)]
            fn call(
                service: ::std::sync::Arc<dyn #trait_ident>,
                arguments: ::culvert::method::DecodedArgs,
                serialiser: ::culvert::serialiser::Serialiser,
            ) -> ::culvert::BoxFuture<'static, ::culvert::anyhow::Result<::culvert::method::Returned>> {
                ::std::boxed::Box::pin(async move {
                    let (#(#bindings,)*) = arguments.take::<(#(#types,)*)>()?;
                    #invoke
                })
            }

            table.insert(::culvert::method::MethodEntry::new(#name, #parameters, decode, call))?;
        }
    }
}
