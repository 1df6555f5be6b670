//! 动态值模型
//!
//! 业务方法参数、返回值、构造参数在拦截链中统一以 [`Value`] 表示，
//! 声明的参数类型以 [`ParamType`] 表示，二者之间的可赋值规则决定了
//! `set_parameters` 能否接受一组新参数。

use crate::class::ClassName;
use crate::error::{DispatchError, InterceptorError, InterceptorResult};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 基本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Bool,
    Char,
    Int,
    Long,
    Double,
}

impl Primitive {
    /// 基本类型名称
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Bool => "boolean",
            Primitive::Char => "char",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Double => "double",
        }
    }

    /// 对应的装箱类型名称
    pub fn boxed_name(&self) -> &'static str {
        match self {
            Primitive::Bool => "Boolean",
            Primitive::Char => "Character",
            Primitive::Int => "Integer",
            Primitive::Long => "Long",
            Primitive::Double => "Double",
        }
    }
}

/// 声明的参数类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    /// 基本类型，不接受 null
    Primitive(Primitive),
    /// 装箱类型，接受对应的基本值或 null
    Boxed(Primitive),
    String,
    /// 指定类（或其超类型）的对象
    Object(ClassName),
    /// 任意值
    Any,
}

impl ParamType {
    pub fn is_primitive(&self) -> bool {
        matches!(self, ParamType::Primitive(_))
    }

    /// 检查值能否赋给该类型的参数槽
    ///
    /// 基本类型槽只接受对应的装箱形式，不做数值拓宽
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ParamType::Primitive(_), Value::Null) => false,
            (_, Value::Null) => true,
            (ParamType::Any, _) => true,
            (ParamType::Primitive(p), v) | (ParamType::Boxed(p), v) => v.primitive() == Some(*p),
            (ParamType::String, Value::Str(_)) => true,
            (ParamType::Object(class), Value::Object(object)) => object.is_instance_of(class),
            _ => false,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Primitive(p) => write!(f, "{}", p.name()),
            ParamType::Boxed(p) => write!(f, "{}", p.boxed_name()),
            ParamType::String => write!(f, "String"),
            ParamType::Object(class) => write!(f, "{}", class),
            ParamType::Any => write!(f, "Object"),
        }
    }
}

/// 对象值
///
/// 携带运行时类名和它可以赋值到的超类型列表
#[derive(Clone)]
pub struct ObjectValue {
    class: ClassName,
    supertypes: Vec<ClassName>,
    data: Arc<dyn Any + Send + Sync>,
}

impl ObjectValue {
    pub fn new<T: Any + Send + Sync>(class: impl Into<ClassName>, data: T) -> Self {
        Self {
            class: class.into(),
            supertypes: Vec::new(),
            data: Arc::new(data),
        }
    }

    /// 声明一个可赋值的超类型（接口）
    pub fn with_supertype(mut self, class: impl Into<ClassName>) -> Self {
        self.supertypes.push(class.into());
        self
    }

    pub fn class(&self) -> &ClassName {
        &self.class
    }

    pub fn is_instance_of(&self, class: &ClassName) -> bool {
        &self.class == class || self.supertypes.contains(class)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectValue")
            .field("class", &self.class)
            .field("supertypes", &self.supertypes)
            .finish()
    }
}

/// 动态值
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Char(char),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Object(ObjectValue),
}

impl Value {
    /// 创建对象值
    pub fn object<T: Any + Send + Sync>(class: impl Into<ClassName>, data: T) -> Self {
        Value::Object(ObjectValue::new(class, data))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// 值对应的基本类型（装箱形式）
    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            Value::Bool(_) => Some(Primitive::Bool),
            Value::Char(_) => Some(Primitive::Char),
            Value::Int(_) => Some(Primitive::Int),
            Value::Long(_) => Some(Primitive::Long),
            Value::Double(_) => Some(Primitive::Double),
            _ => None,
        }
    }

    /// 运行时类型名称（用于错误信息）
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Str(_) => "String".to_string(),
            Value::Object(object) => object.class().to_string(),
            other => other
                .primitive()
                .map(|p| p.boxed_name().to_string())
                .unwrap_or_default(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(l) => Some(*l),
            Value::Int(i) => Some(*i as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            // 对象按引用比较
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(&a.data, &b.data),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(c) => write!(f, "{}", c),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Double(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{}", s),
            Value::Object(object) => write!(f, "{}@object", object.class()),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<char> for Value {
    fn from(value: char) -> Self {
        Value::Char(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<ObjectValue> for Value {
    fn from(value: ObjectValue) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Rust 类型到声明参数类型的映射
///
/// 生成的业务接口代理用它来构造方法签名
pub trait ValueType {
    fn param_type() -> ParamType;

    /// 可空形式下的参数类型，基本类型对应装箱类型
    fn nullable_type() -> ParamType {
        Self::param_type()
    }
}

/// 从动态值还原为 Rust 类型
pub trait FromValue: Sized {
    fn from_value(value: Value) -> InterceptorResult<Self>;
}

fn mismatch(expected: &str, value: &Value) -> InterceptorError {
    InterceptorError::Dispatch(DispatchError::ReturnType {
        expected: expected.to_string(),
        found: value.type_name(),
    })
}

macro_rules! primitive_value_type {
    ($ty:ty, $primitive:expr, $variant:ident) => {
        impl ValueType for $ty {
            fn param_type() -> ParamType {
                ParamType::Primitive($primitive)
            }

            fn nullable_type() -> ParamType {
                ParamType::Boxed($primitive)
            }
        }

        impl FromValue for $ty {
            fn from_value(value: Value) -> InterceptorResult<Self> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(mismatch(stringify!($ty), &other)),
                }
            }
        }
    };
}

primitive_value_type!(bool, Primitive::Bool, Bool);
primitive_value_type!(char, Primitive::Char, Char);
primitive_value_type!(i32, Primitive::Int, Int);
primitive_value_type!(i64, Primitive::Long, Long);
primitive_value_type!(f64, Primitive::Double, Double);

impl ValueType for String {
    fn param_type() -> ParamType {
        ParamType::String
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> InterceptorResult<Self> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl ValueType for &str {
    fn param_type() -> ParamType {
        ParamType::String
    }
}

impl ValueType for Value {
    fn param_type() -> ParamType {
        ParamType::Any
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> InterceptorResult<Self> {
        Ok(value)
    }
}

impl FromValue for () {
    fn from_value(_value: Value) -> InterceptorResult<Self> {
        Ok(())
    }
}

impl<T: ValueType> ValueType for Option<T> {
    fn param_type() -> ParamType {
        T::nullable_type()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> InterceptorResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// 按声明类型校验一组参数
///
/// 个数必须一致；基本类型槽拒绝 null；非 null 值必须可赋值
pub(crate) fn check_parameters(
    declared: &[ParamType],
    params: &[Value],
    target: &str,
) -> InterceptorResult<()> {
    if declared.len() != params.len() {
        return Err(InterceptorError::illegal_argument(format!(
            "Wrong number of parameters for {}: expected {}, got {}",
            target,
            declared.len(),
            params.len()
        )));
    }

    for (index, (expected, value)) in declared.iter().zip(params).enumerate() {
        if value.is_null() && expected.is_primitive() {
            return Err(InterceptorError::illegal_argument(format!(
                "Parameter type mismatch for {}: attempt to set a null value for Arg[{}], expected a value of type {}",
                target, index, expected
            )));
        }
        if !expected.accepts(value) {
            return Err(InterceptorError::illegal_argument(format!(
                "Parameter type mismatch for {}: Arg[{}] of type {} is not assignable to {}",
                target,
                index,
                value.type_name(),
                expected
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_slot_accepts_boxed_form_only() {
        let int = ParamType::Primitive(Primitive::Int);
        assert!(int.accepts(&Value::Int(3)));
        assert!(!int.accepts(&Value::Long(3)));
        assert!(!int.accepts(&Value::Null));
        assert!(!int.accepts(&Value::Str("3".into())));
    }

    #[test]
    fn test_boxed_and_reference_slots_accept_null() {
        assert!(ParamType::Boxed(Primitive::Long).accepts(&Value::Null));
        assert!(ParamType::String.accepts(&Value::Null));
        assert!(ParamType::Object(ClassName::new("Order")).accepts(&Value::Null));
        assert!(ParamType::Any.accepts(&Value::Null));
    }

    #[test]
    fn test_object_assignability_uses_supertypes() {
        let order = Value::Object(ObjectValue::new("RushOrder", 7u32).with_supertype("Order"));
        assert!(ParamType::Object(ClassName::new("RushOrder")).accepts(&order));
        assert!(ParamType::Object(ClassName::new("Order")).accepts(&order));
        assert!(!ParamType::Object(ClassName::new("Invoice")).accepts(&order));
        assert!(ParamType::Any.accepts(&order));
    }

    #[test]
    fn test_check_parameters_arity() {
        let declared = vec![ParamType::String];
        let err = check_parameters(&declared, &[], "m(String)").unwrap_err();
        assert!(err.is_illegal_argument());
    }

    #[test]
    fn test_check_parameters_null_in_primitive_slot() {
        let declared = vec![ParamType::String, ParamType::Primitive(Primitive::Bool)];
        let err = check_parameters(&declared, &[Value::from("ok"), Value::Null], "m")
            .unwrap_err();
        assert!(err.to_string().contains("Arg[1]"));
    }

    #[test]
    fn test_value_type_mapping() {
        assert_eq!(i32::param_type(), ParamType::Primitive(Primitive::Int));
        assert_eq!(Option::<i32>::param_type(), ParamType::Boxed(Primitive::Int));
        assert_eq!(Option::<String>::param_type(), ParamType::String);
        assert_eq!(i64::from_value(Value::Long(9)).unwrap(), 9);
        assert_eq!(Option::<bool>::from_value(Value::Null).unwrap(), None);
        assert!(String::from_value(Value::Int(1)).is_err());
    }

    #[test]
    fn test_object_equality_is_by_reference() {
        let a = Value::object("Order", 1u8);
        let b = Value::object("Order", 1u8);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
