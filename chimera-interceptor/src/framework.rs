//! 框架拦截器
//!
//! 框架拦截器由平台提供，排在所有组件级拦截器之前。它们可以显式构造，
//! 也可以在编译期通过 [`submit_framework_interceptor!`](crate::submit_framework_interceptor) 注册，
//! 再由 [`FrameworkInterceptors::discover`] 统一收集。

use crate::config::InterceptorSettings;
use crate::descriptor::InterceptorBinding;
use crate::system::system_binding;

/// 编译期注册的框架拦截器
pub struct FrameworkInterceptorRegistration {
    /// 排序值，越小越靠前
    pub order: i32,
    pub create: fn() -> InterceptorBinding,
}

inventory::collect!(FrameworkInterceptorRegistration);

/// 注册框架拦截器
///
/// ```ignore
/// fn tx_binding() -> InterceptorBinding {
///     InterceptorBinding::new("chimera.tx.TxInterceptor").around_invoke("around")
/// }
///
/// submit_framework_interceptor!(10, tx_binding);
/// ```
#[macro_export]
macro_rules! submit_framework_interceptor {
    ($order:expr, $create:expr) => {
        $crate::inventory::submit! {
            $crate::FrameworkInterceptorRegistration {
                order: $order,
                create: $create,
            }
        }
    };
}

/// 按配置顺序排列的框架拦截器绑定
#[derive(Debug, Clone, Default)]
pub struct FrameworkInterceptors {
    bindings: Vec<InterceptorBinding>,
}

impl FrameworkInterceptors {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个绑定
    pub fn with(mut self, binding: InterceptorBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn push(&mut self, binding: InterceptorBinding) {
        self.bindings.push(binding);
    }

    pub fn bindings(&self) -> &[InterceptorBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// 收集所有编译期注册的框架拦截器
    ///
    /// 按 `order` 稳定排序，过滤被禁用的类；启用平台委托拦截器时把它放在最前面
    pub fn discover(settings: &InterceptorSettings) -> Self {
        let mut registrations: Vec<&FrameworkInterceptorRegistration> = Vec::new();
        for registration in inventory::iter::<FrameworkInterceptorRegistration> {
            registrations.push(registration);
        }
        registrations.sort_by_key(|registration| registration.order);

        let mut framework = Self::new();
        if settings.system_interceptor {
            framework.push(system_binding());
        }

        for registration in registrations {
            let binding = (registration.create)();
            if settings.is_disabled(binding.class.as_str()) {
                tracing::debug!("Framework interceptor '{}' disabled by settings", binding.class);
                continue;
            }
            tracing::debug!(
                "Discovered framework interceptor '{}' (order {})",
                binding.class,
                registration.order
            );
            framework.push(binding);
        }

        framework
    }

    /// 按设置调整显式构造的绑定：去掉被禁用的类，必要时补上平台委托拦截器
    pub fn apply_settings(self, settings: &InterceptorSettings) -> Self {
        let mut bindings: Vec<InterceptorBinding> = self
            .bindings
            .into_iter()
            .filter(|binding| !settings.is_disabled(binding.class.as_str()))
            .collect();

        let has_system = bindings
            .iter()
            .any(|binding| crate::system::is_system_class(binding.class.as_str()));
        if settings.system_interceptor && !has_system {
            bindings.insert(0, system_binding());
        }

        Self { bindings }
    }
}

impl FromIterator<InterceptorBinding> for FrameworkInterceptors {
    fn from_iter<T: IntoIterator<Item = InterceptorBinding>>(iter: T) -> Self {
        Self {
            bindings: iter.into_iter().collect(),
        }
    }
}
