//! Tests for pairing source and target images by file name

#[cfg(test)]
mod tests {
    use carekit::PipelineError;
    use carekit::data::axes::Axes;
    use carekit::data::raw::RawData;
    use carekit::io::tiff::{Frame, write_frame};
    use ndarray::Array2;
    use std::path::{Path, PathBuf};

    fn write_plane(path: &Path, height: usize, width: usize, offset: u16) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let plane = Array2::from_shape_fn((height, width), |(r, c)| offset + (r * width + c) as u16);
        write_frame(path, &Frame::U16(plane)).unwrap();
    }

    // Tests pairs are found for every target image and sorted by name
    // Verified by skipping the sort of directory entries
    #[test]
    fn test_from_folder_pairs_by_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.tif", "a.tif"] {
            write_plane(&dir.path().join("gt").join(name), 4, 4, 0);
            write_plane(&dir.path().join("in").join(name), 4, 4, 1);
        }
        std::fs::write(dir.path().join("gt").join("notes.txt"), "skip").unwrap();

        let axes = Axes::parse("YX").unwrap();
        let raw = RawData::from_folder(
            dir.path(),
            &[PathBuf::from("in")],
            Path::new("gt"),
            &axes,
        )
        .unwrap();

        assert_eq!(raw.len(), 2);
        assert!(raw.pairs()[0].target.ends_with("a.tif"));
        assert!(raw.pairs()[0].source.ends_with("in/a.tif"));
        assert!(raw.pairs()[1].target.ends_with("b.tif"));
        assert!(raw.description().contains("2 pair(s)"));
    }

    // Tests every source directory contributes its own pairs
    // Verified by only pairing the first source directory
    #[test]
    fn test_from_folder_multiple_source_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write_plane(&dir.path().join("gt/x.tif"), 4, 4, 0);
        write_plane(&dir.path().join("low/x.tif"), 4, 4, 1);
        write_plane(&dir.path().join("high/x.tif"), 4, 4, 2);

        let raw = RawData::from_folder(
            dir.path(),
            &[PathBuf::from("low"), PathBuf::from("high")],
            Path::new("gt"),
            &Axes::parse("YX").unwrap(),
        )
        .unwrap();

        assert_eq!(raw.len(), 2);
        assert!(raw.pairs()[1].source.ends_with("high/x.tif"));
    }

    // Tests a target without a source counterpart is fatal
    // Verified by skipping unmatched targets silently
    #[test]
    fn test_from_folder_missing_pair() {
        let dir = tempfile::tempdir().unwrap();
        write_plane(&dir.path().join("gt/only.tif"), 4, 4, 0);
        std::fs::create_dir_all(dir.path().join("in")).unwrap();

        let result = RawData::from_folder(
            dir.path(),
            &[PathBuf::from("in")],
            Path::new("gt"),
            &Axes::parse("YX").unwrap(),
        );
        assert!(matches!(result, Err(PipelineError::MissingPair { .. })));
    }

    // Tests an empty target directory and a sample axis are rejected
    // Verified by removing the emptiness check
    #[test]
    fn test_from_folder_rejects_empty_and_sample_axis() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("gt")).unwrap();

        let empty = RawData::from_folder(
            dir.path(),
            &[PathBuf::from("in")],
            Path::new("gt"),
            &Axes::parse("YX").unwrap(),
        );
        assert!(matches!(empty, Err(PipelineError::InvalidSourceData { .. })));

        let sampled = RawData::from_folder(
            dir.path(),
            &[PathBuf::from("in")],
            Path::new("gt"),
            &Axes::parse("SYX").unwrap(),
        );
        assert!(matches!(sampled, Err(PipelineError::InvalidParameter { .. })));
    }

    // Tests both images of a pair load with matching shapes
    // Verified by returning the target twice
    #[test]
    fn test_load_pair_reads_both_images() {
        let dir = tempfile::tempdir().unwrap();
        write_plane(&dir.path().join("gt/p.tif"), 3, 5, 0);
        write_plane(&dir.path().join("in/p.tif"), 3, 5, 10);

        let raw = RawData::from_folder(
            dir.path(),
            &[PathBuf::from("in")],
            Path::new("gt"),
            &Axes::parse("YX").unwrap(),
        )
        .unwrap();
        let (source, target) = raw.load_pair(&raw.pairs()[0]).unwrap();

        assert_eq!(source.shape(), &[3, 5]);
        assert_eq!(target.shape(), &[3, 5]);
        assert!((source[[0, 0]] - 10.0).abs() < f32::EPSILON);
        assert!(target[[0, 0]].abs() < f32::EPSILON);
    }

    // Tests pairs of different shape are rejected on load
    // Verified by removing the shape comparison
    #[test]
    fn test_load_pair_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_plane(&dir.path().join("gt/p.tif"), 4, 4, 0);
        write_plane(&dir.path().join("in/p.tif"), 4, 6, 0);

        let raw = RawData::from_folder(
            dir.path(),
            &[PathBuf::from("in")],
            Path::new("gt"),
            &Axes::parse("YX").unwrap(),
        )
        .unwrap();
        assert!(matches!(
            raw.load_pair(&raw.pairs()[0]),
            Err(PipelineError::ShapeMismatch { .. })
        ));
    }
}
