#![allow(dead_code)]

use chimera_interceptor::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// 业务错误，用来验证错误原样透传
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid quantity {0}")]
pub struct InvalidQuantity(pub i32);

pub struct OrderBean {
    pub owner: String,
    pub log: Log,
    next_id: AtomicI64,
}

impl OrderBean {
    pub fn new(owner: impl Into<String>, log: Log) -> Self {
        Self {
            owner: owner.into(),
            log,
            next_id: AtomicI64::new(100),
        }
    }

    fn record(&self, entry: &str) {
        self.log.lock().push(format!("OrderBean.{}", entry));
    }
}

/// 记录每次回调并继续链的拦截器
pub struct Recorder {
    name: &'static str,
    log: Log,
}

pub const RECORDER_HOOKS: [&str; 8] = [
    "aroundConstruct",
    "init",
    "setup",
    "destroy",
    "passivate",
    "activate",
    "around",
    "timeout",
];

pub fn recorder_class(class: &'static str, log: &Log) -> ClassDef {
    let name = class.rsplit('.').next().unwrap_or(class);
    let factory_log = log.clone();
    let mut def = ClassDef::new(class).constructor(move || Recorder {
        name,
        log: factory_log.clone(),
    });
    for hook in RECORDER_HOOKS {
        def = def.interceptor_method(hook, move |this: &Recorder, ctx| {
            this.log.lock().push(format!("{}.{}", this.name, hook));
            ctx.proceed()
        });
    }
    def
}

pub fn order_bean_class(log: &Log) -> ClassDef {
    let factory_log = log.clone();
    ClassDef::new("shop.OrderBean")
        .constructor(move || OrderBean::new("default", factory_log.clone()))
        .method(
            "place",
            vec![ParamType::String, ParamType::Primitive(Primitive::Int)],
            |this: &OrderBean, args| {
                let quantity = args[1].as_i32().unwrap_or_default();
                this.record(&format!("place({}, {})", args[0], quantity));
                if quantity <= 0 {
                    return Err(InvalidQuantity(quantity).into());
                }
                Ok(Value::Long(this.next_id.fetch_add(1, Ordering::SeqCst)))
            },
        )
        .method("owner", Vec::new(), |this: &OrderBean, _args| {
            Ok(Value::from(this.owner.clone()))
        })
        .method(
            "note",
            vec![ParamType::Boxed(Primitive::Bool)],
            |this: &OrderBean, args| {
                this.record(&format!("note({})", args[0]));
                Ok(Value::Null)
            },
        )
        .method("expire", vec![ParamType::String], |this: &OrderBean, args| {
            this.record(&format!("expire({})", args[0]));
            Ok(Value::Bool(true))
        })
        .callback("postConstruct", |this: &OrderBean| {
            this.record("postConstruct");
            Ok(())
        })
        .callback("close", |this: &OrderBean| {
            this.record("close");
            Ok(())
        })
        .callback("ejbCreate", |this: &OrderBean| {
            this.record("ejbCreate");
            Ok(())
        })
        .callback("ejbRemove", |this: &OrderBean| {
            this.record("ejbRemove");
            Ok(())
        })
        .callback("ejbPassivate", |this: &OrderBean| {
            this.record("ejbPassivate");
            Ok(())
        })
        .interceptor_method("audit", |this: &OrderBean, ctx| {
            let method = ctx.method().map(|m| m.name().to_string()).unwrap_or_default();
            this.record(&format!("audit({})", method));
            ctx.proceed()
        })
}

/// 只带业务方法、没有任何回调的组件类
pub fn plain_bean_class(log: &Log) -> ClassDef {
    let factory_log = log.clone();
    ClassDef::new("shop.PlainBean")
        .constructor(move || OrderBean::new("plain", factory_log.clone()))
        .method("owner", Vec::new(), |this: &OrderBean, _args| {
            Ok(Value::from(this.owner.clone()))
        })
}

pub fn registry(log: &Log) -> ClassRegistry {
    ClassRegistry::new()
        .with(order_bean_class(log))
        .with(plain_bean_class(log))
        .with(recorder_class("fw.Framework", log))
        .with(recorder_class("fw.Security", log))
        .with(recorder_class("shop.Component", log))
        .with(recorder_class("shop.Audit", log))
}

pub fn handle(manager: InterceptionManager) -> ClientHandle {
    let handle = ClientHandle::new(Arc::new(manager)).unwrap();
    handle.invoke_around_construct(Vec::new()).unwrap();
    handle
}

pub fn place_signature() -> MethodSignature {
    MethodSignature::new(
        "place",
        vec![ParamType::String, ParamType::Primitive(Primitive::Int)],
    )
}
