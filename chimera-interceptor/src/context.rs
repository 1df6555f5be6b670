//! 调用上下文
//!
//! 每次运行拦截链都会创建一个新的 [`InvocationContext`]，它持有目标实例、参数、游标
//! 以及本次调用的附加数据。拦截器通过 [`InvocationContext::proceed`] 把调用交给下一个元素，
//! 不调用则短路整条链。
//!
//! 游标只能前进：0 表示尚未开始，`i` 表示正在执行第 `i` 个元素，等于链长度时执行终止动作。
//! 终止动作之后再调用 `proceed` 会得到 `IllegalState` 错误。

use crate::chain::{Chain, ChainElement, ChainKind, ElementTarget};
use crate::class::{dispatch, Constructor, DispatchFacility, Instance, MethodArgs, MethodRef};
use crate::descriptor::CallbackKind;
use crate::error::{InterceptorError, InterceptorResult};
use crate::manager::InterceptorInstances;
use crate::value::{check_parameters, ParamType, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// 调用上下文
pub struct InvocationContext<'a> {
    component: &'a str,
    chain: &'a Chain,
    facility: &'a dyn DispatchFacility,
    interceptors: &'a InterceptorInstances,
    target: Option<Instance>,
    constructor: Option<&'a Constructor>,
    parameters: Vec<Value>,
    timer: Option<Value>,
    context_data: HashMap<String, Value>,
    cursor: usize,
}

impl<'a> InvocationContext<'a> {
    pub(crate) fn new(
        component: &'a str,
        chain: &'a Chain,
        facility: &'a dyn DispatchFacility,
        interceptors: &'a InterceptorInstances,
    ) -> Self {
        Self {
            component,
            chain,
            facility,
            interceptors,
            target: None,
            constructor: None,
            parameters: Vec::new(),
            timer: None,
            context_data: HashMap::new(),
            cursor: 0,
        }
    }

    pub(crate) fn with_target(mut self, target: Option<Instance>) -> Self {
        self.target = target;
        self
    }

    pub(crate) fn with_constructor(mut self, constructor: &'a Constructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    pub(crate) fn with_parameters(mut self, parameters: Vec<Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub(crate) fn with_timer(mut self, timer: Option<Value>) -> Self {
        self.timer = timer;
        self
    }

    /// 取出目标实例（AROUND_CONSTRUCT 运行后由管理器回收）
    pub(crate) fn take_target(&mut self) -> Option<Instance> {
        self.target.take()
    }

    /// 把调用交给链上的下一个元素
    ///
    /// 返回下游（最终是终止动作）的结果，下游的错误原样返回
    pub fn proceed(&mut self) -> anyhow::Result<Value> {
        let chain: &'a Chain = self.chain;
        let index = self.cursor;
        if index > chain.len() {
            return Err(InterceptorError::illegal_state(format!(
                "proceed() called on component '{}' after the {} chain already completed",
                self.component,
                chain.kind()
            ))
            .into());
        }
        self.cursor += 1;

        match chain.element(index) {
            Some(element) => self.invoke_element(index, element),
            None => self.invoke_terminal(),
        }
    }

    fn invoke_element(&mut self, index: usize, element: &'a ChainElement) -> anyhow::Result<Value> {
        let facility: &'a dyn DispatchFacility = self.facility;
        let method = element.method();

        tracing::trace!(
            component = self.component,
            chain = %self.chain.kind(),
            position = index,
            method = %method.qualified_name(),
            "Dispatching chain element"
        );

        match element.target() {
            ElementTarget::Interceptor(slot) => {
                let interceptors: &'a InterceptorInstances = self.interceptors;
                let receiver = interceptors.get(slot).ok_or_else(|| {
                    InterceptorError::illegal_state(format!(
                        "No interceptor instance at index {} for component '{}'",
                        slot, self.component
                    ))
                })?;
                dispatch(facility, method, receiver, MethodArgs::Context(self))
            }
            ElementTarget::Bean => {
                let receiver = self.target.clone().ok_or_else(|| {
                    InterceptorError::illegal_state(format!(
                        "Bean-level handler {} has no target instance",
                        method.qualified_name()
                    ))
                })?;
                if method.takes_context() {
                    dispatch(facility, method, &receiver, MethodArgs::Context(self))
                } else {
                    dispatch(facility, method, &receiver, MethodArgs::Values(&[]))?;
                    self.proceed()
                }
            }
        }
    }

    fn invoke_terminal(&mut self) -> anyhow::Result<Value> {
        match self.chain.kind() {
            ChainKind::AroundInvoke | ChainKind::AroundTimeout => {
                let method = self.chain.target_method().ok_or_else(|| {
                    InterceptorError::illegal_state("Business chain has no target method")
                })?;
                let receiver = self.target.as_ref().ok_or_else(|| {
                    InterceptorError::illegal_state(format!(
                        "Cannot invoke {} without a target instance",
                        method.qualified_name()
                    ))
                })?;
                dispatch(
                    self.facility,
                    method,
                    receiver,
                    MethodArgs::Values(&self.parameters),
                )
            }
            ChainKind::Callback(CallbackKind::AroundConstruct) => {
                let constructor = self.constructor.ok_or_else(|| {
                    InterceptorError::illegal_state(format!(
                        "No constructor available for component '{}'",
                        self.component
                    ))
                })?;
                let instance = constructor.construct(&self.parameters)?;
                tracing::trace!(component = self.component, "Target instance constructed");
                self.target = Some(instance);
                Ok(Value::Null)
            }
            ChainKind::Callback(_) => Ok(Value::Null),
        }
    }

    fn declared_parameters(&self) -> InterceptorResult<&'a [ParamType]> {
        let chain: &'a Chain = self.chain;
        match chain.kind() {
            ChainKind::AroundInvoke | ChainKind::AroundTimeout => Ok(chain
                .target_method()
                .map(MethodRef::param_types)
                .unwrap_or(&[])),
            ChainKind::Callback(CallbackKind::AroundConstruct) => self
                .constructor
                .map(Constructor::param_types)
                .ok_or_else(|| {
                    InterceptorError::illegal_state("No constructor bound to this context")
                }),
            kind => Err(InterceptorError::illegal_state(format!(
                "Parameters are not available in a {} callback",
                kind
            ))),
        }
    }

    /// 当前参数（业务方法参数或构造参数）
    pub fn parameters(&self) -> InterceptorResult<&[Value]> {
        self.declared_parameters()?;
        Ok(&self.parameters)
    }

    /// 替换参数
    ///
    /// 个数和类型必须与声明一致，基本类型槽不接受 null；校验失败时原参数保持不变
    pub fn set_parameters(&mut self, parameters: Vec<Value>) -> InterceptorResult<()> {
        let declared = self.declared_parameters()?;
        let target = match self.chain.target_method() {
            Some(method) => method.describe(),
            None => format!("constructor of '{}'", self.component),
        };
        check_parameters(declared, &parameters, &target)?;
        self.parameters = parameters;
        Ok(())
    }

    /// 目标实例；AROUND_CONSTRUCT 链在终止动作之前为空
    pub fn target(&self) -> Option<&Instance> {
        self.target.as_ref()
    }

    /// 以具体类型访问目标实例
    pub fn target_as<T: Any>(&self) -> Option<&T> {
        self.target.as_ref().and_then(|t| t.downcast_ref::<T>())
    }

    /// 被拦截的业务方法；生命周期链返回 `None`
    pub fn method(&self) -> Option<&MethodRef> {
        self.chain.target_method()
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.constructor
    }

    pub fn kind(&self) -> ChainKind {
        self.chain.kind()
    }

    /// 超时链上的定时器对象
    pub fn timer(&self) -> Option<&Value> {
        self.timer.as_ref()
    }

    pub fn component(&self) -> &str {
        self.component
    }

    /// 本次调用在拦截器之间共享的附加数据
    pub fn context_data(&self) -> &HashMap<String, Value> {
        &self.context_data
    }

    pub fn context_data_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.context_data
    }

    /// 下一次 `proceed` 将要执行的位置
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }
}

impl fmt::Debug for InvocationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("component", &self.component)
            .field("kind", &self.chain.kind())
            .field("cursor", &self.cursor)
            .field("chain_len", &self.chain.len())
            .field("has_target", &self.target.is_some())
            .field("parameters", &self.parameters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassDef, ClassRegistry, ParamShape};
    use crate::value::Primitive;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Bean {
        calls: Arc<Mutex<Vec<String>>>,
    }

    struct Pass;

    fn registry(calls: Arc<Mutex<Vec<String>>>) -> ClassRegistry {
        ClassRegistry::new()
            .with(
                ClassDef::new("Bean")
                    .constructor(move || Bean { calls: calls.clone() })
                    .method(
                        "double",
                        vec![ParamType::Primitive(Primitive::Int)],
                        |this: &Bean, args| {
                            this.calls.lock().push("double".to_string());
                            Ok(Value::Int(args[0].as_i32().unwrap_or_default() * 2))
                        },
                    )
                    .callback("setup", |this: &Bean| {
                        this.calls.lock().push("setup".to_string());
                        Ok(())
                    }),
            )
            .with(
                ClassDef::new("Pass")
                    .constructor(|| Pass)
                    .interceptor_method("around", |_this: &Pass, ctx| ctx.proceed())
                    .interceptor_method("twice", |_this: &Pass, ctx| {
                        ctx.proceed()?;
                        ctx.proceed()
                    }),
            )
    }

    fn resolve(registry: &ClassRegistry, class: &str, name: &str, shape: ParamShape) -> MethodRef {
        let class = registry.load_class(&class.into()).unwrap();
        registry.resolve_method(&class, name, &shape).unwrap()
    }

    fn bean(registry: &ClassRegistry) -> Instance {
        let class = registry.load_class(&"Bean".into()).unwrap();
        registry.instantiate_no_arg(&class).unwrap()
    }

    fn pass(registry: &ClassRegistry) -> Instance {
        let class = registry.load_class(&"Pass".into()).unwrap();
        registry.instantiate_no_arg(&class).unwrap()
    }

    fn int_shape() -> ParamShape {
        ParamShape::Params(vec![ParamType::Primitive(Primitive::Int)])
    }

    #[test]
    fn test_empty_chain_runs_terminal_only() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(calls.clone());
        let chain = Chain::around_invoke(resolve(&registry, "Bean", "double", int_shape()), vec![]);
        let instances = InterceptorInstances::default();

        let mut ctx = InvocationContext::new("bean", &chain, &registry, &instances)
            .with_target(Some(bean(&registry)))
            .with_parameters(vec![Value::Int(21)]);

        assert_eq!(ctx.proceed().unwrap(), Value::Int(42));
        assert_eq!(*calls.lock(), vec!["double"]);
    }

    #[test]
    fn test_proceed_after_terminal_is_illegal_state() {
        let registry = registry(Arc::new(Mutex::new(Vec::new())));
        let chain = Chain::callback(CallbackKind::PostConstruct, vec![]);
        let instances = InterceptorInstances::default();

        let mut ctx = InvocationContext::new("bean", &chain, &registry, &instances);
        assert_eq!(ctx.proceed().unwrap(), Value::Null);
        let err = ctx.proceed().unwrap_err();
        let err = err.downcast_ref::<InterceptorError>().unwrap();
        assert!(err.is_illegal_state());
    }

    #[test]
    fn test_interceptor_proceeding_twice_is_rejected() {
        let registry = registry(Arc::new(Mutex::new(Vec::new())));
        let chain = Chain::around_invoke(
            resolve(&registry, "Bean", "double", int_shape()),
            vec![ChainElement::interceptor(
                0,
                resolve(&registry, "Pass", "twice", ParamShape::Context),
            )],
        );
        let instances = InterceptorInstances::from_instances(vec![pass(&registry)]);

        let mut ctx = InvocationContext::new("bean", &chain, &registry, &instances)
            .with_target(Some(bean(&registry)))
            .with_parameters(vec![Value::Int(1)]);
        let err = ctx.proceed().unwrap_err();
        assert!(err
            .downcast_ref::<InterceptorError>()
            .map(InterceptorError::is_illegal_state)
            .unwrap_or(false));
    }

    #[test]
    fn test_bean_level_callback_continues_automatically() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(calls.clone());
        let chain = Chain::callback(
            CallbackKind::PostConstruct,
            vec![
                ChainElement::interceptor(0, resolve(&registry, "Pass", "around", ParamShape::Context)),
                ChainElement::bean(resolve(&registry, "Bean", "setup", ParamShape::none())),
            ],
        );
        let instances = InterceptorInstances::from_instances(vec![pass(&registry)]);

        let mut ctx = InvocationContext::new("bean", &chain, &registry, &instances)
            .with_target(Some(bean(&registry)));
        assert_eq!(ctx.proceed().unwrap(), Value::Null);
        assert_eq!(ctx.position(), chain.len() + 1);
        assert_eq!(*calls.lock(), vec!["setup"]);
    }

    #[test]
    fn test_parameters_rejected_on_plain_callbacks() {
        let registry = registry(Arc::new(Mutex::new(Vec::new())));
        let chain = Chain::callback(CallbackKind::PreDestroy, vec![]);
        let instances = InterceptorInstances::default();

        let mut ctx = InvocationContext::new("bean", &chain, &registry, &instances);
        assert!(ctx.parameters().unwrap_err().is_illegal_state());
        assert!(ctx.set_parameters(vec![]).unwrap_err().is_illegal_state());
    }

    #[test]
    fn test_set_parameters_validates_before_assigning() {
        let registry = registry(Arc::new(Mutex::new(Vec::new())));
        let chain = Chain::around_invoke(resolve(&registry, "Bean", "double", int_shape()), vec![]);
        let instances = InterceptorInstances::default();

        let mut ctx = InvocationContext::new("bean", &chain, &registry, &instances)
            .with_parameters(vec![Value::Int(5)]);

        assert!(ctx.set_parameters(vec![Value::Null]).unwrap_err().is_illegal_argument());
        assert!(ctx
            .set_parameters(vec![Value::from("5")])
            .unwrap_err()
            .is_illegal_argument());
        assert_eq!(ctx.parameters().unwrap(), &[Value::Int(5)]);

        let current = ctx.parameters().unwrap().to_vec();
        ctx.set_parameters(current).unwrap();
        ctx.set_parameters(vec![Value::Int(8)]).unwrap();
        assert_eq!(ctx.parameters().unwrap(), &[Value::Int(8)]);
    }

    #[test]
    fn test_around_construct_terminal_binds_target() {
        let registry = registry(Arc::new(Mutex::new(Vec::new())));
        let chain = Chain::callback(CallbackKind::AroundConstruct, vec![]);
        let instances = InterceptorInstances::default();
        let constructor = Constructor::with_params(vec![ParamType::String], |args| {
            Ok(args[0].as_str().unwrap_or_default().to_uppercase())
        });

        let mut ctx = InvocationContext::new("bean", &chain, &registry, &instances)
            .with_constructor(&constructor)
            .with_parameters(vec![Value::from("orders")]);
        assert!(ctx.target().is_none());
        ctx.proceed().unwrap();
        assert_eq!(ctx.target_as::<String>().map(String::as_str), Some("ORDERS"));
    }
}
