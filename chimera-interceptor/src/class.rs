//! 类元数据与分发设施
//!
//! Rust 没有运行时反射，拦截器类、组件类及其方法通过 [`ClassDef`] 以闭包的形式注册，
//! 引擎只通过 [`DispatchFacility`] 这一窄接口加载类、实例化对象、解析和调用方法。
//!
//! 方法在构建期被解析为 [`MethodRef`]，之后的每次调用都经过同一个分发入口，
//! 由它负责把 [`DispatchError::Target`] 解包为原始错误。

use crate::context::InvocationContext;
use crate::error::DispatchError;
use crate::value::{ParamType, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 类标识
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassName(String);

impl ClassName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 去掉包路径后的简单名
    pub fn simple_name(&self) -> &str {
        self.0.rsplit(['.', ':']).next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClassName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ClassName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// 受管对象实例（组件实例或拦截器实例）
pub type Instance = Arc<dyn Any + Send + Sync>;

/// 方法的参数形态
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamShape {
    /// 唯一参数为调用上下文（拦截器方法）
    Context,
    /// 普通参数列表
    Params(Vec<ParamType>),
}

impl ParamShape {
    /// 无参数
    pub fn none() -> Self {
        ParamShape::Params(Vec::new())
    }
}

impl fmt::Display for ParamShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamShape::Context => write!(f, "(InvocationContext)"),
            ParamShape::Params(params) => {
                let names: Vec<String> = params.iter().map(ToString::to_string).collect();
                write!(f, "({})", names.join(", "))
            }
        }
    }
}

/// 业务方法签名（方法名 + 参数类型）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<ParamType>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, params: Vec<ParamType>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// 无参方法签名
    pub fn no_args(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn shape(&self) -> ParamShape {
        ParamShape::Params(self.params.clone())
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.shape())
    }
}

/// 接收调用上下文的方法体
pub type ContextFn =
    dyn Fn(&Instance, &mut InvocationContext<'_>) -> Result<Value, DispatchError> + Send + Sync;

/// 接收普通参数的方法体
pub type PlainFn = dyn Fn(&Instance, &[Value]) -> Result<Value, DispatchError> + Send + Sync;

/// 构造函数体
pub type FactoryFn = dyn Fn(&[Value]) -> anyhow::Result<Instance> + Send + Sync;

#[derive(Clone)]
enum MethodBody {
    Context(Arc<ContextFn>),
    Plain(Arc<PlainFn>),
}

struct MethodInner {
    declaring_class: ClassName,
    name: String,
    shape: ParamShape,
    body: MethodBody,
}

/// 已解析的方法引用
///
/// 在构建期获取一次，之后通过 [`DispatchFacility::invoke`] 调用
#[derive(Clone)]
pub struct MethodRef {
    inner: Arc<MethodInner>,
}

impl MethodRef {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn declaring_class(&self) -> &ClassName {
        &self.inner.declaring_class
    }

    pub fn shape(&self) -> &ParamShape {
        &self.inner.shape
    }

    /// 是否以调用上下文作为唯一参数
    pub fn takes_context(&self) -> bool {
        matches!(self.inner.shape, ParamShape::Context)
    }

    /// 声明的参数类型；拦截器方法返回空切片
    pub fn param_types(&self) -> &[ParamType] {
        match &self.inner.shape {
            ParamShape::Params(params) => params,
            ParamShape::Context => &[],
        }
    }

    /// `Class.method` 形式的名称
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.inner.declaring_class.simple_name(), self.inner.name)
    }

    /// 完整签名描述
    pub fn describe(&self) -> String {
        format!("{}.{}{}", self.inner.declaring_class, self.inner.name, self.inner.shape)
    }

    pub fn ptr_eq(&self, other: &MethodRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRef")
            .field("class", &self.inner.declaring_class)
            .field("name", &self.inner.name)
            .field("shape", &self.inner.shape)
            .finish()
    }
}

/// 方法调用参数
pub enum MethodArgs<'r, 'c> {
    /// 把调用上下文作为唯一参数传入
    Context(&'r mut InvocationContext<'c>),
    /// 普通参数
    Values(&'r [Value]),
}

impl MethodArgs<'_, '_> {
    fn describe(&self) -> &'static str {
        match self {
            MethodArgs::Context(_) => "an invocation context",
            MethodArgs::Values(_) => "plain arguments",
        }
    }
}

/// 构造函数
///
/// 既用于拦截器类的注册，也是容器为 AROUND_CONSTRUCT 提供的终止动作
#[derive(Clone)]
pub struct Constructor {
    params: Vec<ParamType>,
    factory: Arc<FactoryFn>,
}

impl Constructor {
    /// 无参构造
    pub fn no_arg<T, F>(factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            params: Vec::new(),
            factory: Arc::new(move |_args| Ok(Arc::new(factory()) as Instance)),
        }
    }

    /// 带参构造
    pub fn with_params<T, F>(params: Vec<ParamType>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&[Value]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            params,
            factory: Arc::new(move |args| Ok(Arc::new(factory(args)?) as Instance)),
        }
    }

    /// 直接提供已装箱实例的构造（容器已自行完成依赖注入时使用）
    pub fn from_fn<F>(params: Vec<ParamType>, factory: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Instance> + Send + Sync + 'static,
    {
        Self {
            params,
            factory: Arc::new(factory),
        }
    }

    pub fn param_types(&self) -> &[ParamType] {
        &self.params
    }

    pub fn is_no_arg(&self) -> bool {
        self.params.is_empty()
    }

    /// 调用构造；构造体返回的错误原样透传
    pub fn construct(&self, args: &[Value]) -> anyhow::Result<Instance> {
        (self.factory)(args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("params", &self.params)
            .finish()
    }
}

/// 类定义构建器
///
/// # 示例
///
/// ```ignore
/// let class = ClassDef::new("TxInterceptor")
///     .constructor(|| TxInterceptor::default())
///     .interceptor_method("around", |this: &TxInterceptor, ctx| {
///         this.begin();
///         ctx.proceed()
///     })
///     .build();
/// ```
pub struct ClassDef {
    name: ClassName,
    constructors: Vec<Constructor>,
    methods: Vec<MethodRef>,
}

impl ClassDef {
    pub fn new(name: impl Into<ClassName>) -> Self {
        Self {
            name: name.into(),
            constructors: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// 注册无参构造
    pub fn constructor<T, F>(mut self, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.constructors.push(Constructor::no_arg(factory));
        self
    }

    /// 注册带参构造
    pub fn constructor_with<T, F>(mut self, params: Vec<ParamType>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&[Value]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.constructors.push(Constructor::with_params(params, factory));
        self
    }

    /// 注册以调用上下文为唯一参数的方法（拦截器方法、around-invoke 方法）
    pub fn interceptor_method<T, F>(mut self, name: &str, body: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &mut InvocationContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let class = self.name.clone();
        let method = name.to_string();
        let body: Arc<ContextFn> = Arc::new(move |receiver, ctx| {
            let this = downcast::<T>(receiver, &class, &method)?;
            body(this, ctx).map_err(DispatchError::Target)
        });
        self.push_method(name, ParamShape::Context, MethodBody::Context(body));
        self
    }

    /// 注册普通方法（业务方法、超时方法）
    pub fn method<T, F>(mut self, name: &str, params: Vec<ParamType>, body: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let class = self.name.clone();
        let method = name.to_string();
        let body: Arc<PlainFn> = Arc::new(move |receiver, args| {
            let this = downcast::<T>(receiver, &class, &method)?;
            body(this, args).map_err(DispatchError::Target)
        });
        self.push_method(name, ParamShape::Params(params), MethodBody::Plain(body));
        self
    }

    /// 注册无参生命周期回调（组件类上的 post-construct 等）
    pub fn callback<T, F>(self, name: &str, body: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.method(name, Vec::new(), move |this: &T, _args| {
            body(this)?;
            Ok(Value::Null)
        })
    }

    fn push_method(&mut self, name: &str, shape: ParamShape, body: MethodBody) {
        self.methods.push(MethodRef {
            inner: Arc::new(MethodInner {
                declaring_class: self.name.clone(),
                name: name.to_string(),
                shape,
                body,
            }),
        });
    }

    pub fn build(self) -> ClassRef {
        ClassRef {
            inner: Arc::new(self),
        }
    }
}

fn downcast<'i, T: Any>(
    receiver: &'i Instance,
    class: &ClassName,
    method: &str,
) -> Result<&'i T, DispatchError> {
    receiver
        .downcast_ref::<T>()
        .ok_or_else(|| DispatchError::ReceiverMismatch {
            class: class.clone(),
            method: method.to_string(),
        })
}

/// 已加载的类
#[derive(Clone)]
pub struct ClassRef {
    inner: Arc<ClassDef>,
}

impl ClassRef {
    pub fn name(&self) -> &ClassName {
        &self.inner.name
    }

    pub fn constructors(&self) -> &[Constructor] {
        &self.inner.constructors
    }

    /// 无参构造（如果声明了）
    pub fn no_arg_constructor(&self) -> Option<&Constructor> {
        self.inner.constructors.iter().find(|c| c.is_no_arg())
    }

    pub fn methods(&self) -> &[MethodRef] {
        &self.inner.methods
    }

    /// 按名称和参数形态查找方法
    pub fn find_method(&self, name: &str, shape: &ParamShape) -> Option<&MethodRef> {
        self.inner
            .methods
            .iter()
            .find(|m| m.name() == name && m.shape() == shape)
    }

    /// 是否声明了指定名称的方法（不区分形态）
    pub fn declares_method(&self, name: &str) -> bool {
        self.inner.methods.iter().any(|m| m.name() == name)
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRef")
            .field("name", &self.inner.name)
            .field("constructors", &self.inner.constructors.len())
            .field("methods", &self.inner.methods)
            .finish()
    }
}

/// 类加载 / 动态分发设施
///
/// 只有 `load_class` 必须实现，其余操作默认基于 [`ClassRef`] 中注册的元数据完成
pub trait DispatchFacility: Send + Sync {
    /// 按标识加载类
    fn load_class(&self, name: &ClassName) -> Result<ClassRef, DispatchError>;

    /// 通过无参构造实例化
    fn instantiate_no_arg(&self, class: &ClassRef) -> Result<Instance, DispatchError> {
        let constructor = class
            .no_arg_constructor()
            .ok_or_else(|| DispatchError::NoDefaultConstructor(class.name().clone()))?;
        constructor
            .construct(&[])
            .map_err(|e| DispatchError::Instantiation {
                class: class.name().clone(),
                reason: e.to_string(),
            })
    }

    /// 解析方法
    fn resolve_method(
        &self,
        class: &ClassRef,
        name: &str,
        shape: &ParamShape,
    ) -> Result<MethodRef, DispatchError> {
        class
            .find_method(name, shape)
            .cloned()
            .ok_or_else(|| DispatchError::NoSuchMethod {
                class: class.name().clone(),
                method: name.to_string(),
                shape: shape.to_string(),
            })
    }

    /// 调用方法；方法体自身的错误以 [`DispatchError::Target`] 返回
    fn invoke(
        &self,
        method: &MethodRef,
        receiver: &Instance,
        args: MethodArgs<'_, '_>,
    ) -> Result<Value, DispatchError> {
        match (&method.inner.body, args) {
            (MethodBody::Context(body), MethodArgs::Context(ctx)) => body(receiver, ctx),
            (MethodBody::Plain(body), MethodArgs::Values(values)) => body(receiver, values),
            (_, args) => Err(DispatchError::ArgumentShape {
                method: method.describe(),
                given: args.describe(),
            }),
        }
    }
}

/// 引擎唯一的分发入口
///
/// 目标错误在这里被解包，引擎其余部分只处理原始错误
pub(crate) fn dispatch(
    facility: &dyn DispatchFacility,
    method: &MethodRef,
    receiver: &Instance,
    args: MethodArgs<'_, '_>,
) -> anyhow::Result<Value> {
    facility
        .invoke(method, receiver, args)
        .map_err(DispatchError::into_cause)
}

/// 内存中的类注册表，[`DispatchFacility`] 的默认实现
#[derive(Default)]
pub struct ClassRegistry {
    classes: RwLock<HashMap<ClassName, ClassRef>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册类定义，同名类会被覆盖
    pub fn register(&self, class: ClassDef) -> ClassRef {
        let class = class.build();
        let previous = self
            .classes
            .write()
            .insert(class.name().clone(), class.clone());
        if previous.is_some() {
            tracing::warn!("Class '{}' was already registered, replacing definition", class.name());
        } else {
            tracing::debug!("Registered class '{}'", class.name());
        }
        class
    }

    /// 链式注册
    pub fn with(self, class: ClassDef) -> Self {
        self.register(class);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

impl DispatchFacility for ClassRegistry {
    fn load_class(&self, name: &ClassName) -> Result<ClassRef, DispatchError> {
        self.classes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::ClassNotFound(name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Primitive;

    struct Counter {
        step: i32,
    }

    fn counter_class() -> ClassDef {
        ClassDef::new("demo.Counter")
            .constructor(|| Counter { step: 2 })
            .method(
                "add",
                vec![ParamType::Primitive(Primitive::Int)],
                |this: &Counter, args| {
                    let base = args[0].as_i32().unwrap_or_default();
                    Ok(Value::Int(base + this.step))
                },
            )
            .method("fail", Vec::new(), |_this: &Counter, _args| {
                Err(anyhow::anyhow!("boom"))
            })
    }

    #[test]
    fn test_class_name_simple_name() {
        assert_eq!(ClassName::new("demo.Counter").simple_name(), "Counter");
        assert_eq!(ClassName::new("a::b::Tx").simple_name(), "Tx");
        assert_eq!(ClassName::new("Plain").simple_name(), "Plain");
    }

    #[test]
    fn test_registry_load_and_invoke() {
        let registry = ClassRegistry::new().with(counter_class());
        let class = registry.load_class(&ClassName::new("demo.Counter")).unwrap();
        let instance = registry.instantiate_no_arg(&class).unwrap();
        let add = registry
            .resolve_method(
                &class,
                "add",
                &ParamShape::Params(vec![ParamType::Primitive(Primitive::Int)]),
            )
            .unwrap();

        let result = dispatch(&registry, &add, &instance, MethodArgs::Values(&[Value::Int(40)]));
        assert_eq!(result.unwrap(), Value::Int(42));
    }

    #[test]
    fn test_missing_class_and_method() {
        let registry = ClassRegistry::new().with(counter_class());
        assert!(matches!(
            registry.load_class(&ClassName::new("demo.Missing")),
            Err(DispatchError::ClassNotFound(_))
        ));

        let class = registry.load_class(&ClassName::new("demo.Counter")).unwrap();
        assert!(matches!(
            registry.resolve_method(&class, "add", &ParamShape::none()),
            Err(DispatchError::NoSuchMethod { .. })
        ));
    }

    #[test]
    fn test_target_error_surfaces_unwrapped() {
        let registry = ClassRegistry::new().with(counter_class());
        let class = registry.load_class(&ClassName::new("demo.Counter")).unwrap();
        let instance = registry.instantiate_no_arg(&class).unwrap();
        let fail = registry.resolve_method(&class, "fail", &ParamShape::none()).unwrap();

        let err = dispatch(&registry, &fail, &instance, MethodArgs::Values(&[])).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_receiver_mismatch_is_dispatch_error() {
        let registry = ClassRegistry::new().with(counter_class());
        let class = registry.load_class(&ClassName::new("demo.Counter")).unwrap();
        let fail = registry.resolve_method(&class, "fail", &ParamShape::none()).unwrap();
        let wrong: Instance = Arc::new(String::from("not a counter"));

        let err = dispatch(&registry, &fail, &wrong, MethodArgs::Values(&[])).unwrap_err();
        assert!(err.downcast_ref::<crate::InterceptorError>().is_some());
    }

    #[test]
    fn test_argument_constructor_is_not_default() {
        let registry = ClassRegistry::new().with(
            ClassDef::new("demo.NeedsArgs")
                .constructor_with(vec![ParamType::String], |args| {
                    Ok(args[0].as_str().unwrap_or_default().to_string())
                }),
        );
        let class = registry.load_class(&ClassName::new("demo.NeedsArgs")).unwrap();
        assert!(matches!(
            registry.instantiate_no_arg(&class),
            Err(DispatchError::NoDefaultConstructor(_))
        ));
    }

    #[test]
    fn test_signature_display() {
        let sig = MethodSignature::new(
            "place",
            vec![ParamType::String, ParamType::Primitive(Primitive::Int)],
        );
        assert_eq!(sig.to_string(), "place(String, int)");
    }
}
