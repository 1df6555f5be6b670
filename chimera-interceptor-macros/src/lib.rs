//! Chimera Interceptor 过程宏
//!
//! - `#[business_interface]` - 为业务接口 trait 生成经过拦截链的代理

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemTrait};

mod business;

/// `#[business_interface]` 属性宏
///
/// 保留 trait 定义，并生成 `<Trait>Proxy` 结构体：它持有一个 `ClientHandle`，
/// 把每个方法调用转换成方法签名和参数值交给句柄，再把返回值还原为声明的类型。
///
/// 要求：
/// - 方法接收者为 `&self`
/// - 返回类型为 `Result<T, E>`（通常是 `anyhow::Result<T>`），`E` 需要能从
///   `anyhow::Error` 和 `InterceptorError` 转换
/// - 参数类型实现 `ValueType`，并能转换为 `Value`
///
/// 使用示例：
/// ```ignore
/// #[business_interface]
/// pub trait OrderService {
///     fn place(&self, item: String, quantity: i32) -> anyhow::Result<i64>;
/// }
///
/// let proxy = OrderServiceProxy::new(handle);
/// let id = proxy.place("book".to_string(), 2)?;
/// ```
#[proc_macro_attribute]
pub fn business_interface(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[business_interface] does not take arguments",
        )
        .to_compile_error()
        .into();
    }

    let item_trait = parse_macro_input!(item as ItemTrait);
    business::impl_business_interface(&item_trait)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
