mod sub_resource;
pub use sub_resource::SubResource;

mod backend_pool;
pub use backend_pool::{BackendAddressPool, BackendAddressPoolProperties, LoadBalancerBackendAddress, LoadBalancerBackendAddressProperties};

mod load_balancer;
pub use load_balancer::{LoadBalancer, LoadBalancerProperties};

mod interface;
pub use interface::{InterfaceIpConfiguration, InterfaceIpConfigurationProperties, NetworkInterface, NetworkInterfaceProperties};

mod virtual_machine;
pub use virtual_machine::{NetworkInterfaceReference, NetworkInterfaceReferenceProperties, NetworkProfile, VirtualMachine, VirtualMachineProperties};
