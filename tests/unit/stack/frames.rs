//! Tests for splitting multi-page TIFF stacks into per-frame files

#[cfg(test)]
mod tests {
    use carekit::io::progress::ProgressManager;
    use carekit::io::tiff::{Frame, read_pages, write_frame, write_pages};
    use carekit::stack::frames::{ImageStack, SplitOptions, frame_path, split_frames, write_frames};
    use ndarray::Array2;
    use std::path::Path;

    fn frame(offset: u16) -> Frame {
        Frame::U16(Array2::from_shape_fn((64, 64), |(y, x)| {
            offset + (y * 64 + x) as u16
        }))
    }

    fn write_stack(path: &Path, count: u16) -> Vec<Frame> {
        let frames: Vec<Frame> = (0..count).map(|i| frame(i * 1000)).collect();
        write_pages(path, &frames).unwrap();
        frames
    }

    // Tests a stack is split into one file per frame named by index
    // Verified by numbering frames from one
    #[test]
    fn test_split_writes_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("stack.tif");
        let frames = write_stack(&input, 3);
        let output = dir.path().join("frames");

        let report = split_frames(
            &input,
            &output,
            SplitOptions::default(),
            &mut ProgressManager::hidden(),
        )
        .unwrap();

        assert_eq!(report.written.len(), 3);
        assert!(report.pruned.is_empty());
        for (index, expected) in frames.iter().enumerate() {
            let path = output.join(format!("{index}.tif"));
            assert_eq!(report.written[index], path);
            let pages = read_pages(&path).unwrap();
            assert_eq!(pages.len(), 1);
            assert_eq!(&pages[0], expected);
        }
    }

    // Tests existing frame files are overwritten
    // Verified by skipping files that already exist
    #[test]
    fn test_split_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("stack.tif");
        let frames = write_stack(&input, 2);
        let output = dir.path().join("frames");
        std::fs::create_dir_all(&output).unwrap();
        write_frame(&frame_path(&output, 0), &Frame::U8(Array2::zeros((4, 4)))).unwrap();

        split_frames(&input, &output, SplitOptions::default(), &mut ProgressManager::hidden())
            .unwrap();

        assert_eq!(read_pages(&output.join("0.tif")).unwrap()[0], frames[0]);
    }

    // Tests stale numbered frames are removed only when pruning is requested, and only under canonical names
    // Verified by pruning every file whose stem parses as an index
    #[test]
    fn test_prune_stale_frames() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("stack.tif");
        write_stack(&input, 2);
        let output = dir.path().join("frames");
        std::fs::create_dir_all(&output).unwrap();
        for index in [2, 5] {
            write_frame(&frame_path(&output, index), &frame(0)).unwrap();
        }
        for name in ["notes.tif", "007.tif", "+3.tif"] {
            std::fs::write(output.join(name), b"keep").unwrap();
        }

        let kept = split_frames(
            &input,
            &output,
            SplitOptions::default(),
            &mut ProgressManager::hidden(),
        )
        .unwrap();
        assert!(kept.pruned.is_empty());
        assert!(output.join("5.tif").exists());

        let pruned = split_frames(
            &input,
            &output,
            SplitOptions { prune_stale: true },
            &mut ProgressManager::hidden(),
        )
        .unwrap();
        assert_eq!(pruned.pruned, vec![output.join("2.tif"), output.join("5.tif")]);
        assert!(!output.join("2.tif").exists());
        assert!(output.join("1.tif").exists());
        for name in ["notes.tif", "007.tif", "+3.tif"] {
            assert!(output.join(name).exists(), "{name} is not a frame name");
        }
    }

    // Tests stacks must hold frames of one shape and sample type
    // Verified by checking only the first frame
    #[test]
    fn test_from_frames_validates() {
        assert!(ImageStack::from_frames(Vec::new()).is_err());
        assert!(
            ImageStack::from_frames(vec![frame(0), Frame::U16(Array2::zeros((32, 64)))]).is_err()
        );
        assert!(
            ImageStack::from_frames(vec![frame(0), Frame::U8(Array2::zeros((64, 64)))]).is_err()
        );

        let stack = ImageStack::from_frames(vec![frame(0), frame(1)]).unwrap();
        assert_eq!(stack.frame_count(), 2);
        assert_eq!((stack.height(), stack.width()), (64, 64));
        assert_eq!(stack.frames()[1], frame(1));
    }

    // Tests writing an in-memory stack creates the output directory
    // Verified by requiring the directory to exist beforehand
    #[test]
    fn test_write_frames_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested").join("frames");
        let stack = ImageStack::from_frames(vec![Frame::F32(Array2::from_elem((3, 3), 0.5))]).unwrap();

        let report = write_frames(
            &stack,
            &output,
            SplitOptions::default(),
            &mut ProgressManager::hidden(),
        )
        .unwrap();
        assert_eq!(report.written, vec![frame_path(&output, 0)]);
        assert_eq!(ImageStack::read(&output.join("0.tif")).unwrap(), stack);
    }

    // Tests missing inputs are reported
    // Verified by writing an empty output directory
    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("frames");
        assert!(
            split_frames(
                &dir.path().join("absent.tif"),
                &output,
                SplitOptions::default(),
                &mut ProgressManager::hidden(),
            )
            .is_err()
        );
        assert!(!output.exists());
    }
}
