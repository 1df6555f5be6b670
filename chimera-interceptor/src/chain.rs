//! 拦截链
//!
//! 链是构建期确定的有序元素序列，末尾隐含一个终止动作（调用业务方法、构造目标实例
//! 或直接完成）。链一旦构建就不可变，可在线程间共享。

use crate::class::MethodRef;
use crate::descriptor::CallbackKind;
use std::fmt;

/// 链所服务的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    Callback(CallbackKind),
    AroundInvoke,
    AroundTimeout,
}

impl ChainKind {
    /// 该链上是否允许读写参数
    pub fn has_parameters(&self) -> bool {
        matches!(
            self,
            ChainKind::Callback(CallbackKind::AroundConstruct)
                | ChainKind::AroundInvoke
                | ChainKind::AroundTimeout
        )
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Callback(kind) => write!(f, "{}", kind),
            ChainKind::AroundInvoke => f.write_str("AROUND_INVOKE"),
            ChainKind::AroundTimeout => f.write_str("AROUND_TIMEOUT"),
        }
    }
}

/// 元素的调用目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementTarget {
    /// 拦截器实例表中的下标
    Interceptor(usize),
    /// 目标组件实例本身
    Bean,
}

/// 链元素
#[derive(Debug, Clone)]
pub struct ChainElement {
    target: ElementTarget,
    method: MethodRef,
}

impl ChainElement {
    pub fn interceptor(index: usize, method: MethodRef) -> Self {
        Self {
            target: ElementTarget::Interceptor(index),
            method,
        }
    }

    pub fn bean(method: MethodRef) -> Self {
        Self {
            target: ElementTarget::Bean,
            method,
        }
    }

    pub fn target(&self) -> ElementTarget {
        self.target
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// 拦截器实例下标，组件级元素返回 `None`
    pub fn instance_index(&self) -> Option<usize> {
        match self.target {
            ElementTarget::Interceptor(index) => Some(index),
            ElementTarget::Bean => None,
        }
    }

    pub fn is_bean_level(&self) -> bool {
        self.target == ElementTarget::Bean
    }
}

/// 拦截链
#[derive(Debug, Clone)]
pub struct Chain {
    kind: ChainKind,
    elements: Vec<ChainElement>,
    target_method: Option<MethodRef>,
}

impl Chain {
    /// 生命周期回调链
    pub fn callback(kind: CallbackKind, elements: Vec<ChainElement>) -> Self {
        Self {
            kind: ChainKind::Callback(kind),
            elements,
            target_method: None,
        }
    }

    /// 业务方法链
    pub fn around_invoke(target_method: MethodRef, elements: Vec<ChainElement>) -> Self {
        Self {
            kind: ChainKind::AroundInvoke,
            elements,
            target_method: Some(target_method),
        }
    }

    /// 超时方法链
    pub fn around_timeout(target_method: MethodRef, elements: Vec<ChainElement>) -> Self {
        Self {
            kind: ChainKind::AroundTimeout,
            elements,
            target_method: Some(target_method),
        }
    }

    pub fn kind(&self) -> ChainKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn element(&self, index: usize) -> Option<&ChainElement> {
        self.elements.get(index)
    }

    pub fn elements(&self) -> &[ChainElement] {
        &self.elements
    }

    /// 终止动作调用的业务方法 / 超时方法
    pub fn target_method(&self) -> Option<&MethodRef> {
        self.target_method.as_ref()
    }

    /// 元素的 `Class.method` 列表
    pub fn describe(&self) -> Vec<String> {
        self.elements
            .iter()
            .map(|element| element.method().qualified_name())
            .collect()
    }
}
