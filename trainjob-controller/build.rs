use kube::CustomResourceExt;
use std::fs;
use trainjob_types::*;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/trainjob.example.io_trainjobs_crd.yaml",
        serde_yaml::to_string(&TrainJob::crd()).unwrap(),
    )
    .unwrap();
}
