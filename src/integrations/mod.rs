//! Vendor integrations built on the convergence engine.

pub mod cdn;
pub mod firepower;
pub mod teampass;
pub mod xml;
pub mod zabbix;
