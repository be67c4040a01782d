//! Tests for patch position filtering, sampling and dataset assembly

#[cfg(test)]
mod tests {
    use carekit::data::axes::Axes;
    use carekit::data::patches::{
        BackgroundFilter, PatchConfig, PatchDataset, PercentileRange, create_patches,
        create_patches_to_file, sample_patch_pairs, to_cyx, valid_patch_corners,
    };
    use carekit::data::raw::RawData;
    use carekit::io::archive::load_patch_dataset;
    use carekit::io::progress::ProgressManager;
    use carekit::io::tiff::{Frame, write_frame, write_pages};
    use ndarray::{Array2, Array3, Array4, ArrayD, IxDyn};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::path::{Path, PathBuf};

    fn ramp(channels: usize, height: usize, width: usize) -> Array3<f32> {
        Array3::from_shape_fn((channels, height, width), |(c, r, col)| {
            (c * 1000 + r * width + col) as f32
        })
    }

    fn config(patch: usize, n: usize) -> PatchConfig {
        PatchConfig {
            patch_size: (patch, patch),
            n_patches_per_image: n,
            patch_filter: None,
            ..PatchConfig::default()
        }
    }

    // Tests the defaults of the original dataset script
    // Verified by changing the default patch size
    #[test]
    fn test_patch_config_defaults() {
        let config = PatchConfig::default();
        assert_eq!(config.patch_size, (128, 128));
        assert_eq!(config.n_patches_per_image, 200);
        assert_eq!(config.patch_filter, Some(BackgroundFilter::default()));
        assert_eq!(config.normalization, PercentileRange::default());
        assert!(config.validate().is_ok());
    }

    // Tests zero sizes and reversed percentile ranges are rejected
    // Verified by removing the ordering check
    #[test]
    fn test_patch_config_validate() {
        assert!(config(0, 1).validate().is_err());
        assert!(config(4, 0).validate().is_err());

        let mut reversed = config(4, 1);
        reversed.normalization.high = (99.9, 99.5);
        assert!(reversed.validate().is_err());
    }

    // Tests a missing channel axis is inserted in front
    // Verified by appending the channel axis last
    #[test]
    fn test_to_cyx_inserts_channel() {
        let image = ArrayD::from_shape_fn(IxDyn(&[4, 5]), |idx| (idx[0] * 5 + idx[1]) as f32);
        let cyx = to_cyx(image, &Axes::parse("YX").unwrap()).unwrap();
        assert_eq!(cyx.shape(), &[1, 4, 5]);
        assert!((cyx[[0, 2, 3]] - 13.0).abs() < f32::EPSILON);
    }

    // Tests a trailing channel axis is moved to the front
    // Verified by permuting with the inverse order
    #[test]
    fn test_to_cyx_permutes_channel_last() {
        let image = ArrayD::from_shape_fn(IxDyn(&[4, 5, 2]), |idx| {
            (idx[2] * 100 + idx[0] * 5 + idx[1]) as f32
        });
        let cyx = to_cyx(image, &Axes::parse("YXC").unwrap()).unwrap();
        assert_eq!(cyx.shape(), &[2, 4, 5]);
        assert!((cyx[[1, 3, 4]] - 119.0).abs() < f32::EPSILON);
    }

    // Tests every corner is valid without a filter
    // Verified by excluding the last row of corners
    #[test]
    fn test_valid_corners_without_filter() {
        let target = ramp(1, 10, 12);
        let corners = valid_patch_corners(&target, (4, 5), None);
        assert_eq!(corners.len(), 7 * 8);
        assert!(valid_patch_corners(&target, (11, 4), None).is_empty());
    }

    // Tests the background filter only admits patches near bright pixels
    // Verified by comparing against the threshold with >= on a flat image
    #[test]
    fn test_valid_corners_with_background_filter() {
        let mut target = Array3::zeros((1, 16, 16));
        target[[0, 8, 8]] = 1.0;

        let corners = valid_patch_corners(&target, (4, 4), Some(&BackgroundFilter::default()));
        assert_eq!(corners, vec![(6, 6), (6, 7), (7, 6), (7, 7)]);

        let flat = Array3::zeros((1, 16, 16));
        assert!(valid_patch_corners(&flat, (4, 4), Some(&BackgroundFilter::default())).is_empty());
    }

    // Tests sampled pairs keep source and target aligned
    // Verified by sampling target positions independently
    #[test]
    fn test_sample_patch_pairs_aligned() {
        let image = ramp(2, 16, 16);
        let mut rng = StdRng::seed_from_u64(7);
        let (x, y) = sample_patch_pairs(&image, &image, &config(4, 10), &mut rng).unwrap();

        assert_eq!(x.shape(), &[10, 2, 4, 4]);
        assert_eq!(x, y);
    }

    // Tests sampling falls back to replacement when few positions exist
    // Verified by always sampling without replacement
    #[test]
    fn test_sample_patch_pairs_with_replacement() {
        let image = ramp(1, 4, 4);
        let mut rng = StdRng::seed_from_u64(7);
        let (x, _) = sample_patch_pairs(&image, &image, &config(4, 3), &mut rng).unwrap();
        assert_eq!(x.shape(), &[3, 1, 4, 4]);
    }

    // Tests oversized patches and empty foreground are rejected
    // Verified by clamping the patch size to the image
    #[test]
    fn test_sample_patch_pairs_errors() {
        let image = ramp(1, 4, 4);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(sample_patch_pairs(&image, &image, &config(5, 1), &mut rng).is_err());

        let flat = Array3::zeros((1, 8, 8));
        let mut filtered = config(4, 1);
        filtered.patch_filter = Some(BackgroundFilter::default());
        assert!(sample_patch_pairs(&flat, &flat, &filtered, &mut rng).is_err());
    }

    // Tests datasets reject source and target of different shape and any layout but SCYX
    // Verified by skipping validation in the constructor
    #[test]
    fn test_patch_dataset_pairing_invariant() {
        let axes = Axes::parse("SCYX").unwrap();
        let x = Array4::zeros((3, 1, 4, 4));
        let y = Array4::zeros((2, 1, 4, 4));
        assert!(PatchDataset::new(x.clone(), y, axes.clone()).is_err());

        let dataset = PatchDataset::new(x.clone(), x.clone(), axes).unwrap();
        assert_eq!(dataset.len(), 3);

        for label in ["CSYX", "SYXC", "SCXY"] {
            let axes = Axes::parse(label).unwrap();
            assert!(PatchDataset::new(x.clone(), x.clone(), axes).is_err(), "{label}");
        }
        assert!(!dataset.is_empty());
    }

    fn write_raw_pairs(root: &Path, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            for (dir, offset) in [("gt", 0_u16), ("in", 3_u16)] {
                let path = root.join(dir).join(name);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                let plane = Array2::from_shape_fn((16, 16), |(r, c)| {
                    offset + (i * 7 + r * 16 + c) as u16
                });
                write_frame(&path, &Frame::U16(plane)).unwrap();
            }
        }
    }

    // Tests the dataset holds N patches per image in SCYX layout, deterministically
    // Verified by sampling N patches in total instead of per image
    #[test]
    fn test_create_patches_counts_per_image() {
        let dir = tempfile::tempdir().unwrap();
        write_raw_pairs(dir.path(), &["a.tif", "b.tif"]);
        let raw = RawData::from_folder(
            dir.path(),
            &[PathBuf::from("in")],
            Path::new("gt"),
            &Axes::parse("YX").unwrap(),
        )
        .unwrap();

        let config = config(8, 5);
        let mut progress = ProgressManager::hidden();
        let first = create_patches(&raw, &config, &mut progress).unwrap();
        let second = create_patches(&raw, &config, &mut progress).unwrap();

        assert_eq!(first.x().shape(), &[10, 1, 8, 8]);
        assert_eq!(first.y().shape(), first.x().shape());
        assert_eq!(first.axes().as_str(), "SCYX");
        assert_eq!(first, second);
    }

    // Tests pairs with different channel counts name their block shapes and the join failure
    // Verified by discarding the concatenation error
    #[test]
    fn test_create_patches_rejects_mixed_channels() {
        let dir = tempfile::tempdir().unwrap();
        for (name, channels) in [("a.tif", 2_u16), ("b.tif", 3_u16)] {
            for dir_name in ["gt", "in"] {
                let path = dir.path().join(dir_name).join(name);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                let pages: Vec<Frame> = (0..channels)
                    .map(|c| {
                        Frame::U16(Array2::from_shape_fn((16, 16), |(r, col)| {
                            c * 100 + (r * 16 + col) as u16
                        }))
                    })
                    .collect();
                write_pages(&path, &pages).unwrap();
            }
        }
        let raw = RawData::from_folder(
            dir.path(),
            &[PathBuf::from("in")],
            Path::new("gt"),
            &Axes::parse("CYX").unwrap(),
        )
        .unwrap();

        let message = create_patches(&raw, &config(8, 2), &mut ProgressManager::hidden())
            .unwrap_err()
            .to_string();
        assert!(message.contains("[[2, 2, 8, 8], [2, 3, 8, 8]]"));
        assert!(message.contains("incompatible shapes"));
    }

    // Tests the dataset written to disk matches the returned one
    // Verified by writing the unshuffled patches
    #[test]
    fn test_create_patches_to_file() {
        let dir = tempfile::tempdir().unwrap();
        write_raw_pairs(dir.path(), &["a.tif"]);
        let raw = RawData::from_folder(
            dir.path(),
            &[PathBuf::from("in")],
            Path::new("gt"),
            &Axes::parse("YX").unwrap(),
        )
        .unwrap();

        let output = dir.path().join("data").join("patches.npz");
        let dataset =
            create_patches_to_file(&raw, &config(8, 4), &output, &mut ProgressManager::hidden())
                .unwrap();

        assert_eq!(load_patch_dataset(&output).unwrap(), dataset);
    }
}
