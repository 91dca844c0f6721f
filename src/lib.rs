//! spin-aks provisions and manages Spin applications on Azure Kubernetes
//! Service. It drives the `az`, `kubectl`, and `helm` CLIs through an
//! injectable process layer, keeps a small per-user JSON config of the
//! selected subscription, cluster, and workload identity, and layers the
//! Spin Operator install, identity federation, CosmosDB role binding, and
//! SpinApp deployment on top.

pub mod bind;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod deploy;
pub mod identity;
pub mod subprocess;
