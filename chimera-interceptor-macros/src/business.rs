use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{
    FnArg, GenericArgument, GenericParam, ItemTrait, Pat, PathArguments, ReturnType, TraitItem,
    TraitItemFn, Type,
};

/// 生成业务接口代理
pub fn impl_business_interface(item_trait: &ItemTrait) -> syn::Result<TokenStream> {
    if !item_trait.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &item_trait.generics,
            "#[business_interface] does not support generic traits",
        ));
    }

    let trait_ident = &item_trait.ident;
    let vis = &item_trait.vis;
    let proxy_ident = format_ident!("{}Proxy", trait_ident);
    let proxy_doc = format!("`{}` 的拦截代理，所有调用都经过业务方法链", trait_ident);

    let mut methods = Vec::new();
    for item in &item_trait.items {
        match item {
            TraitItem::Fn(method) => methods.push(proxy_method(method)?),
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "#[business_interface] traits may only contain methods",
                ))
            }
        }
    }

    Ok(quote! {
        #item_trait

        #[doc = #proxy_doc]
        #[derive(Clone, Debug)]
        #vis struct #proxy_ident {
            handle: ::chimera_interceptor::ClientHandle,
        }

        impl #proxy_ident {
            pub fn new(handle: ::chimera_interceptor::ClientHandle) -> Self {
                Self { handle }
            }

            pub fn handle(&self) -> &::chimera_interceptor::ClientHandle {
                &self.handle
            }
        }

        impl #trait_ident for #proxy_ident {
            #(#methods)*
        }
    })
}

fn proxy_method(method: &TraitItemFn) -> syn::Result<TokenStream> {
    let sig = &method.sig;

    if sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            sig.asyncness,
            "business interface methods must be synchronous",
        ));
    }
    if let Some(param) = sig
        .generics
        .params
        .iter()
        .find(|p| !matches!(p, GenericParam::Lifetime(_)))
    {
        return Err(syn::Error::new_spanned(
            param,
            "business interface methods cannot have type or const parameters",
        ));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "business interface methods must take `&self`",
            ))
        }
    }

    let mut arg_idents = Vec::new();
    let mut arg_types = Vec::new();
    for input in inputs {
        let FnArg::Typed(pat_type) = input else {
            return Err(syn::Error::new_spanned(input, "unexpected receiver"));
        };
        let Pat::Ident(pat_ident) = pat_type.pat.as_ref() else {
            return Err(syn::Error::new_spanned(
                &pat_type.pat,
                "business interface arguments must be plain identifiers",
            ));
        };
        arg_idents.push(pat_ident.ident.clone());
        arg_types.push(pat_type.ty.as_ref().clone());
    }

    let ok_type = result_ok_type(&sig.output)?;
    let method_name = sig.ident.to_string();

    Ok(quote! {
        #sig {
            let __signature = ::chimera_interceptor::MethodSignature::new(
                #method_name,
                ::std::vec![#(<#arg_types as ::chimera_interceptor::ValueType>::param_type()),*],
            );
            let __result = self.handle.invoke(
                &__signature,
                ::std::vec![#(::chimera_interceptor::Value::from(#arg_idents)),*],
            )?;
            ::std::result::Result::Ok(
                <#ok_type as ::chimera_interceptor::FromValue>::from_value(__result)?,
            )
        }
    })
}

/// 提取 `Result<T, E>` 中的 `T`
fn result_ok_type(output: &ReturnType) -> syn::Result<Type> {
    let error = || {
        syn::Error::new_spanned(
            output,
            "business interface methods must return `Result<T, E>`",
        )
    };

    let ReturnType::Type(_, ty) = output else {
        return Err(error());
    };
    let Type::Path(type_path) = ty.as_ref() else {
        return Err(error());
    };
    let segment = type_path.path.segments.last().ok_or_else(error)?;
    if segment.ident != "Result" {
        return Err(error());
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return Err(error());
    };
    match args.args.first() {
        Some(GenericArgument::Type(ok)) => Ok(ok.clone()),
        _ => Err(error()),
    }
}
