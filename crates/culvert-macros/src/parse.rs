//! Attribute arguments and trait validation.

use proc_macro2::Span;
use proc_macro2::TokenStream;
use syn::FnArg;
use syn::GenericArgument;
use syn::Ident;
use syn::ItemTrait;
use syn::LitStr;
use syn::Pat;
use syn::PathArguments;
use syn::ReturnType;
use syn::Signature;
use syn::TraitItem;
use syn::Type;
use syn::TypeParamBound;
use syn::parse::Parser;
use syn::parse_quote;

/// Wire identity overrides. `None` fields fall back to defaults at expansion.
#[derive(Default)]
pub struct Identity {
    pub name: Option<LitStr>,
    pub module: Option<LitStr>,
    pub version: Option<LitStr>,
    pub culture: Option<LitStr>,
    pub key_token: Option<LitStr>,
}

pub struct Method {
    pub ident: Ident,
    pub arguments: Vec<(Ident, Type)>,
    /// `None` for methods returning `Result<()>`.
    pub output: Option<Type>,
    pub signature: Signature,
}

pub struct Parsed {
    pub item: ItemTrait,
    pub identity: Identity,
    pub methods: Vec<Method>,
}

pub fn parse(attr: TokenStream, item: TokenStream, remote: bool) -> syn::Result<Parsed> {
    let identity = identity(attr)?;
    let mut item: ItemTrait = syn::parse2(item)?;
    if !item.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&item.generics, "interface traits cannot be generic"));
    }
    add_thread_safety(&mut item);

    let methods = if remote {
        item.items.iter().map(method).collect::<syn::Result<Vec<_>>>()?
    } else {
        Vec::new()
    };
    Ok(Parsed { item, identity, methods })
}

fn identity(attr: TokenStream) -> syn::Result<Identity> {
    let mut identity = Identity::default();
    let parser = syn::meta::parser(|meta| {
        let slot = if meta.path.is_ident("name") {
            &mut identity.name
        } else if meta.path.is_ident("module") {
            &mut identity.module
        } else if meta.path.is_ident("version") {
            &mut identity.version
        } else if meta.path.is_ident("culture") {
            &mut identity.culture
        } else if meta.path.is_ident("key_token") {
            &mut identity.key_token
        } else {
            return Err(meta.error("expected one of `name`, `module`, `version`, `culture`, `key_token`"));
        };
        *slot = Some(meta.value()?.parse()?);
        Ok(())
    });
    parser.parse2(attr)?;
    Ok(identity)
}

/// Instances are shared across tasks, so every interface is `Send + Sync`.
fn add_thread_safety(item: &mut ItemTrait) {
    for marker in ["Send", "Sync"] {
        let present = item.supertraits.iter().any(|bound| match bound {
            TypeParamBound::Trait(t) => t.path.segments.last().is_some_and(|s| s.ident == marker),
            _ => false,
        });
        if !present {
            let marker = Ident::new(marker, Span::call_site());
            item.supertraits.push(parse_quote!(::core::marker::#marker));
        }
    }
    if item.colon_token.is_none() {
        item.colon_token = Some(Default::default());
    }
}

fn method(item: &TraitItem) -> syn::Result<Method> {
    let TraitItem::Fn(function) = item else {
        return Err(syn::Error::new_spanned(item, "service traits may only contain methods"));
    };
    let sig = &function.sig;

    if sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(sig, "service methods must be `async`"));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&sig.generics, "service methods cannot be generic"));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver)) if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => return Err(syn::Error::new_spanned(sig, "service methods must take `&self`")),
    }

    let arguments = inputs
        .map(|input| match input {
            FnArg::Typed(typed) => match typed.pat.as_ref() {
                Pat::Ident(pat) => Ok((pat.ident.clone(), (*typed.ty).clone())),
                other => Err(syn::Error::new_spanned(other, "service method arguments must be plain identifiers")),
            },
            FnArg::Receiver(receiver) => Err(syn::Error::new_spanned(receiver, "unexpected receiver")),
        })
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(Method {
        ident: sig.ident.clone(),
        arguments,
        output: result_type(sig)?,
        signature: sig.clone(),
    })
}

/// `T` from `-> Result<T>` or `-> Result<T, E>`; `None` when `T` is `()`.
fn result_type(sig: &Signature) -> syn::Result<Option<Type>> {
    let error = || {
        syn::Error::new_spanned(
            sig,
            "service methods must return `Result<T>`; use `Result<()>` for methods without a value",
        )
    };

    let ReturnType::Type(_, ty) = &sig.output else {
        return Err(error());
    };
    let Type::Path(path) = ty.as_ref() else {
        return Err(error());
    };
    let segment = path.path.segments.last().ok_or_else(error)?;
    if segment.ident != "Result" {
        return Err(error());
    }
    let PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return Err(error());
    };
    match arguments.args.first() {
        Some(GenericArgument::Type(Type::Tuple(unit))) if unit.elems.is_empty() => Ok(None),
        Some(GenericArgument::Type(value)) => Ok(Some(value.clone())),
        _ => Err(error()),
    }
}
