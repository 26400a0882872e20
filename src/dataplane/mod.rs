//! Controller dataplane logic
//!
//! - `mac_table`: per-device MAC learning
//! - `policy`: host-pair firewall
//! - `load_balancer`: virtual-IP ARP responder and redirect rules
//! - `dispatcher`: per-device event pipeline tying the above together

pub mod dispatcher;
pub mod load_balancer;
pub mod mac_table;
pub mod policy;

pub use dispatcher::{Device, DeviceEvent, DeviceState, Dispatcher};
pub use load_balancer::{
    ArpDecision, Backend, LoadBalancer, PendingFlowKey, RedirectRequest, Selection, VirtualService,
};
pub use mac_table::{L2ForwardAction, MacTable};
pub use policy::{HostPair, PolicyEngine, Verdict};
