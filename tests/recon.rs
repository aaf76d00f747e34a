mod common;

use common::synthetic::{blob_volume, real_correlation, spiral_views, transform_of};
use particle_recon::image::fft::{fft2, Direction};
use particle_recon::kernel::SpectralKernel;
use particle_recon::recon::{
    combine, Accumulator, CombineOptions, Interpolation, MapGroup, PackParams,
};

const SIZE: usize = 24;

fn pack_params(interpolation: Interpolation) -> PackParams {
    PackParams {
        size: SIZE,
        sampling: 1.0,
        hi_res: 3.0,
        lo_res: 0.0,
        interpolation,
        ewald_lambda: 0.0,
    }
}

/// Packs sections of the map's own transform at the given views.
fn pack_views(acc: &mut Accumulator, views: &[particle_recon::view::View]) {
    let map = blob_volume(SIZE, 1.0);
    let ft = transform_of(&map);
    let kernel = SpectralKernel::default();
    let radius = SIZE as f32 / 2.0 - 1.0;
    for view in views {
        let section = ft.central_section(&view.matrix(), radius, &kernel);
        acc.pack_plane(&section, &view.matrix(), 1.0, 1.0)
            .expect("packing a matching section succeeds");
    }
}

#[test]
fn many_views_rebuild_the_map() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut acc = Accumulator::new(pack_params(Interpolation::Trilinear)).unwrap();
    pack_views(&mut acc, &spiral_views(60));
    let out = combine(&[acc], MapGroup::Full, &CombineOptions::default()).unwrap();

    let original = blob_volume(SIZE, 1.0);
    let corr = real_correlation(&out.map, &original);
    assert!(corr > 0.5, "reconstruction correlates {corr} with the truth");
    assert!(out.friedel_residual < 0.2, "friedel {}", out.friedel_residual);
    assert!(out.coverage > 0.5, "coverage {}", out.coverage);
}

#[test]
fn more_views_mean_more_coverage_and_agreement() {
    let _ = env_logger::builder().is_test(true).try_init();
    let opts = CombineOptions {
        produce_real_map: false,
        snr_map: false,
    };
    let mut sparse = Accumulator::new(pack_params(Interpolation::Nearest)).unwrap();
    pack_views(&mut sparse, &spiral_views(4));
    let mut dense = Accumulator::new(pack_params(Interpolation::Nearest)).unwrap();
    pack_views(&mut dense, &spiral_views(48));
    let s = combine(&[sparse], MapGroup::Full, &opts).unwrap();
    let d = combine(&[dense], MapGroup::Full, &opts).unwrap();
    assert!(d.coverage > s.coverage);
    // Sections of the same transform agree wherever they cross, so shells
    // hit by several views carry positive SNR.
    let d_snr: f32 = d.shells.iter().map(|sh| sh.snr).sum();
    assert!(d_snr > 0.0);
}

#[test]
fn half_set_maps_correlate() {
    let _ = env_logger::builder().is_test(true).try_init();
    let views = spiral_views(40);
    let mut acc1 = Accumulator::new(pack_params(Interpolation::Trilinear)).unwrap();
    let mut acc2 = Accumulator::new(pack_params(Interpolation::Trilinear)).unwrap();
    pack_views(&mut acc1, &views.iter().step_by(2).copied().collect::<Vec<_>>());
    pack_views(
        &mut acc2,
        &views.iter().skip(1).step_by(2).copied().collect::<Vec<_>>(),
    );
    let accs = vec![acc1, acc2];
    let h1 = combine(&accs, MapGroup::Half1, &CombineOptions::default()).unwrap();
    let h2 = combine(&accs, MapGroup::Half2, &CombineOptions::default()).unwrap();
    let corr = real_correlation(&h1.map, &h2.map);
    assert!(corr > 0.5, "half maps correlate {corr}");
}

#[test]
fn shell_resolution_estimates_are_ordered() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut acc = Accumulator::new(pack_params(Interpolation::Trilinear)).unwrap();
    pack_views(&mut acc, &spiral_views(48));
    let out = combine(
        &[acc],
        MapGroup::Full,
        &CombineOptions {
            produce_real_map: false,
            snr_map: true,
        },
    )
    .unwrap();
    // Estimates stay within the packed band.
    let band_limit = 3.0;
    assert!(out.resolution_fsc >= band_limit * 0.8, "fsc res {}", out.resolution_fsc);
    assert!(out.resolution_snr >= band_limit * 0.8, "snr res {}", out.resolution_snr);
    // Shell zero is DC; shells are indexed by radius.
    for (i, shell) in out.shells.iter().enumerate() {
        assert_eq!(shell.radius, i);
    }
    let snr = out.snr.expect("snr map requested");
    assert!(snr.iter().all(|v| v.is_finite()));
}

#[test]
fn friedel_preserved_through_rotated_packing() {
    let _ = env_logger::builder().is_test(true).try_init();
    // A transform of a real image keeps Friedel symmetry whatever the
    // packing orientation, because mates land on mirrored positions.
    let mut acc = Accumulator::new(pack_params(Interpolation::Trilinear)).unwrap();
    let vals: Vec<f32> = (0..SIZE * SIZE).map(|i| ((i * 11) % 23) as f32).collect();
    let mut plane = particle_recon::image::Plane::from_real(SIZE, SIZE, 1.0, &vals).unwrap();
    fft2(&mut plane, Direction::Forward);
    let view = particle_recon::view::View::new(0.3, -0.2, 0.93, 0.7);
    acc.pack_plane(&plane, &view.matrix(), 1.0, 1.0).unwrap();
    let out = combine(
        &[acc],
        MapGroup::Full,
        &CombineOptions {
            produce_real_map: false,
            snr_map: false,
        },
    )
    .unwrap();
    assert!(out.friedel_residual < 0.15, "friedel {}", out.friedel_residual);
}
