use dp_mnist::{compute_dpsgd_epsilon, gaussian_rdp_epsilon, EpsilonConversion, RdpAccountant};

fn main() {
    // Batch 128 of 10k examples for 1260 steps.
    let q = 128.0 / 10_000.0;
    let steps = 1260u64;
    let delta = 1e-4;

    let eps = compute_dpsgd_epsilon(q, 1.1, steps, delta).expect("epsilon");
    println!("q={q} sigma=1.1 T={steps}: epsilon @ delta={delta} = {eps:.4}");

    let mut acct = RdpAccountant::new().with_conversion(EpsilonConversion::Tight);
    acct.compose(1.1, q, steps).expect("compose");
    let (tight, order) = acct.get_epsilon_and_order(delta).expect("epsilon");
    println!("tight conversion: epsilon = {tight:.4} at order {order}");

    println!("\nsigma   subsampled   full-batch");
    for sigma in [0.6, 0.8, 1.1, 1.5, 2.0, 4.0] {
        let sub = compute_dpsgd_epsilon(q, sigma, steps, delta).expect("epsilon");
        let full = gaussian_rdp_epsilon(sigma, steps, delta).expect("epsilon");
        println!("{sigma:<7} {sub:<12.4} {full:.2}");
    }
}
