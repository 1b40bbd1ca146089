use base::{io::CompressionScheme, optics::Ior};
use lamina_layer::{
    build_channels,
    heuristic::{self, Discretization},
    AddingOptions, BsdfFile, BsdfStorage, CoatedMaterial, Interface, MicrofacetParams,
    StorageOptions,
};

fn coarse_gold() -> CoatedMaterial {
    CoatedMaterial {
        discretization: Some(Discretization { n: 24, m: 8 }),
        ..CoatedMaterial::coated_gold()
    }
}

#[test]
fn rougher_coatings_need_coarser_sampling() {
    let sharp = heuristic::choose(&MicrofacetParams::new(Ior::dielectric(1.5), 0.1)).unwrap();
    let rough = heuristic::choose(&MicrofacetParams::new(Ior::dielectric(1.5), 0.5)).unwrap();
    assert!(sharp.n >= rough.n);
    assert!(sharp.m >= rough.m);

    let stack = CoatedMaterial::coated_gold().discretization().unwrap();
    assert_eq!(stack.n % 2, 0);
    assert!(stack.n >= sharp.n);
    assert_eq!(stack.m, sharp.m);
}

#[test]
fn coated_gold_is_opaque_and_conserves_energy() {
    let material = coarse_gold();
    let (quad, layers) = build_channels(&material, &AddingOptions::default()).unwrap();
    assert_eq!(quad.len(), 24);
    assert_eq!(layers.len(), 3);

    let mut normal_albedo = Vec::new();
    for layer in &layers {
        assert!(layer.energy_violation(1e-9).is_none());
        assert!(layer.modes().iter().all(|mode| mode.transmission_tb.amax() == 0.0));
        assert!(matches!(layer.interfaces()[0], Interface::Microfacet(p) if p == material.coating));
        let albedo = layer.albedo_top();
        assert!(albedo.iter().all(|&a| (0.0..=1.0 + 1e-9).contains(&a)));
        normal_albedo.push(albedo[albedo.len() - 1]);
    }
    // Gold reflects red best and blue worst.
    assert!(normal_albedo[0] > normal_albedo[1]);
    assert!(normal_albedo[1] > normal_albedo[2]);
    assert!(normal_albedo[2] > 0.05);
}

#[test]
fn coated_gold_survives_storage() {
    let (_, layers) = build_channels(&coarse_gold(), &AddingOptions::default()).unwrap();
    let path = std::env::temp_dir().join(format!("lamina-coated-gold-{}.bsdf", std::process::id()));
    let options = StorageOptions {
        compression: CompressionScheme::Zlib,
        ..StorageOptions::default()
    };
    BsdfStorage::from_layers(&path, &layers, options).unwrap();

    let mut file = BsdfFile::open(&path).unwrap();
    assert_eq!(file.params().channels, 3);
    assert_eq!(file.params().orders, 8);
    assert_eq!(file.quadrature(), layers[0].quadrature());
    for (channel, layer) in layers.iter().enumerate() {
        assert_eq!(&file.read_layer(channel).unwrap(), layer);
    }
    std::fs::remove_file(&path).unwrap();
}
