//! Prints the OpenStackLoadBalanceService CRD manifest to stdout.

use crds::OpenStackLoadBalanceService;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crd = OpenStackLoadBalanceService::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
