mod ids;
pub use ids::{backend_pool_id, load_balancer_id, vnet_id, ResourceId};

mod cache;
pub use cache::{CacheReadType, TimedCache};

mod clients;
pub use clients::{BackendAddressPoolClient, LoadBalancerClient, VmSet};

mod arm;
pub use arm::ArmClient;

mod availability_set;
pub use availability_set::AvailabilitySet;
