use approx::assert_abs_diff_eq;
use briny_infer::ce::dispatch::{AnyNetwork, AnyProvider};
use briny_infer::ce::SyncType;
use briny_infer::net::{Activation, Layer, Network, SynapsesData};
use briny_infer::{Backend, ErrorKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

fn random_vec(rng: &mut StdRng, len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|_| rng.random_range(-scale..scale)).collect()
}

/// Fills `net` with seeded weights and biases.
fn randomize(net: &mut Network, rng: &mut StdRng) {
    let data: Vec<SynapsesData> = net
        .chain()
        .synapses()
        .map(|edge| {
            let scale = 1.0 / (edge.prev_count() as f32).sqrt();
            SynapsesData::new(
                random_vec(rng, edge.weights_count(), scale),
                random_vec(rng, edge.biases_count(), 0.5),
            )
        })
        .collect();
    net.load_weights_and_biases(&data).unwrap();
}

/// Row-major `rows × prev` times `prev × next`, one output row per task.
fn par_matmul(lhs: &[f32], rhs: &[f32], prev: usize, next: usize) -> Vec<f32> {
    let rows = lhs.len() / prev;
    let mut out = vec![0.0; rows * next];
    out.par_chunks_mut(next)
        .zip(lhs.par_chunks(prev))
        .for_each(|(row, input)| {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..prev).fold(0.0, |acc, k| acc + input[k] * rhs[k * next + j]);
            }
        });
    out
}

fn ready_networks(topology: &Network) -> Vec<(AnyProvider, AnyNetwork)> {
    [Backend::Cpu, Backend::Pool, Backend::Wgpu]
        .into_iter()
        .filter(|b| b.is_available())
        .filter_map(|backend| {
            let mut provider = AnyProvider::new(backend).unwrap();
            match provider.init(None) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => return None,
                Err(e) => panic!("{backend}: {e}"),
            }
            let mut network = provider.create_network().unwrap();
            network.init(topology).unwrap();
            Some((provider, network))
        })
        .collect()
}

#[test]
fn identity_chain_matches_parallel_matmul() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let widths = [16u32, 24, 8, 5];
    let mut topology = Network::new();
    let layers: Vec<Layer> = widths[1..]
        .iter()
        .map(|&n| Layer::new(n, Activation::Identity))
        .collect();
    topology.init(widths[0], &layers).unwrap();
    randomize(&mut topology, &mut rng);

    let batch = 32;
    let inputs = random_vec(&mut rng, batch * widths[0] as usize, 1.0);
    let mut want = inputs.clone();
    for edge in topology.chain().synapses() {
        want = par_matmul(
            &want,
            edge.weights(),
            edge.prev_count() as usize,
            edge.next_count() as usize,
        );
    }

    for (_provider, mut network) in ready_networks(&topology) {
        let mut got = vec![0.0; batch * *widths.last().unwrap() as usize];
        network.evaluate(batch as u32, &inputs, &mut got).unwrap();
        for (g, w) in got.iter().zip(&want) {
            assert_abs_diff_eq!(*g, *w, epsilon = 1e-4);
        }
    }
}

#[test]
fn backends_agree_on_random_networks() {
    let mut rng = StdRng::seed_from_u64(42);
    let hidden = [
        Layer::new(33, Activation::TanH).with_bias(1.0),
        Layer::new(17, Activation::Elu).with_args(&[0.7]).with_bias(0.5),
        Layer::new(9, Activation::Srelu).with_args(&[-0.5, 0.2, 0.5, 0.3]),
        Layer::new(6, Activation::SoftMax).with_bias(1.0),
    ];
    let mut topology = Network::new();
    topology.init(12, &hidden).unwrap();
    randomize(&mut topology, &mut rng);

    let batch = 10;
    let inputs = random_vec(&mut rng, batch * 12, 2.0);
    let mut results = Vec::new();
    for (provider, mut network) in ready_networks(&topology) {
        let mut out = vec![0.0; batch * 6];
        network.evaluate(batch as u32, &inputs, &mut out).unwrap();
        for row in out.chunks(6) {
            assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-4);
        }
        results.push((provider.backend(), out));
    }

    let (_, reference) = &results[0];
    for (backend, out) in &results[1..] {
        match backend {
            // same summation order as the reference path
            Backend::Pool => assert_eq!(out, reference),
            _ => {
                for (g, w) in out.iter().zip(reference) {
                    assert_abs_diff_eq!(*g, *w, epsilon = 1e-4);
                }
            }
        }
    }
}

#[test]
fn repeated_lifecycles() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut topology = Network::new();
    topology
        .init(
            4,
            &[
                Layer::new(8, Activation::Relu).with_bias(1.0),
                Layer::new(2, Activation::Sigmoid).with_bias(1.0),
            ],
        )
        .unwrap();
    randomize(&mut topology, &mut rng);
    let inputs = random_vec(&mut rng, 4, 1.0);

    for backend in [Backend::Cpu, Backend::Pool, Backend::Wgpu] {
        if !backend.is_available() {
            continue;
        }
        let mut provider = AnyProvider::new(backend).unwrap();
        let mut first: Option<Vec<f32>> = None;
        for _ in 0..3 {
            match provider.init(None) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => panic!("{backend}: {e}"),
            }
            assert!(provider.is_ok());
            let mut network = provider.create_network().unwrap();
            assert!(!network.is_ok());
            for _ in 0..2 {
                network.init(&topology).unwrap();
                assert!(network.is_ok());
                assert_eq!(network.layers_count(), 2);
                assert_eq!((network.input_count(), network.output_count()), (4, 2));
                assert!(network.mem_size() > 0);

                let mut out = vec![0.0; 2];
                network.evaluate(1, &inputs, &mut out).unwrap();
                match &first {
                    Some(prev) => assert_eq!(prev, &out),
                    None => first = Some(out),
                }
                network.uninit();
                network.uninit();
                assert!(!network.is_ok());
            }

            let mut out = vec![0.0; 2];
            let err = network.evaluate(1, &inputs, &mut out).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotInitialized);
            let err = network
                .sync_to_ce(&topology, true, SyncType::ALL)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotInitialized);

            provider.destroy_network(network).unwrap();
            provider.uninit();
            provider.uninit();
            assert!(!provider.is_ok());
            assert_eq!(
                provider.create_network().unwrap_err().kind(),
                ErrorKind::NotInitialized
            );
        }
    }
}
