use newfs::{
    disk_format::block::BLOCK_SIZE,
    error::NewfsError,
    newfs::{EntryKind, FormatOptions, Newfs},
    storage::MemoryStorage,
};

fn new_fs() -> Newfs<MemoryStorage> {
    Newfs::mount(MemoryStorage::new(512), &FormatOptions::default()).unwrap()
}

fn read_to_vec(fs: &Newfs<MemoryStorage>, path: &str, offset: usize, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    let read_len = fs.read(path, &mut buf, offset).unwrap();
    buf.truncate(read_len);
    buf
}

#[test]
fn test_nested_write_truncate_read() {
    let mut fs = new_fs();

    fs.create_directory("/a").unwrap();
    fs.create_file("/a/b").unwrap();
    assert_eq!(fs.write("/a/b", b"hello", 0), Ok(5));

    let attr = fs.attributes("/a/b").unwrap();
    assert_eq!(attr.kind, EntryKind::Regular);
    assert_eq!(attr.size, 5);
    assert_eq!(attr.blocks, 1);

    fs.truncate("/a/b", 2).unwrap();
    let size = fs.attributes("/a/b").unwrap().size as usize;
    assert_eq!(read_to_vec(&fs, "/a/b", 0, size), b"he");

    // stale bytes stay behind the new size
    assert_eq!(&read_to_vec(&fs, "/a/b", 0, 5), b"hello");
}

#[test]
fn test_create_twice() {
    let mut fs = new_fs();

    fs.create_directory("/x").unwrap();
    assert_eq!(fs.create_directory("/x"), Err(NewfsError::Exists));
    assert_eq!(NewfsError::Exists.to_errno(), libc::EEXIST);
}

#[test]
fn test_missing_path() {
    let fs = new_fs();

    let err = fs.attributes("/missingdir").unwrap_err();
    assert_eq!(err, NewfsError::NotFound);
    assert_eq!(err.code(), -libc::ENOENT);
}

#[test]
fn test_readdir_walk() {
    let mut fs = new_fs();
    fs.create_directory("/d").unwrap();
    fs.create_file("/d/one").unwrap();
    fs.create_directory("/d/two").unwrap();
    fs.create_file("/d/three").unwrap();

    let mut names = vec![];
    while let Some(child) = fs.list_children("/d", names.len()).unwrap() {
        names.push(child.name);
    }

    assert_eq!(names, vec!["one", "two", "three"]);
    assert_eq!(fs.attributes("/d").unwrap().child_count, 3);
}

#[test]
fn test_file_spanning_blocks() {
    let mut fs = new_fs();
    fs.create_file("/big").unwrap();

    let mut written = 0;
    for chunk in 0..5u8 {
        let data = vec![chunk; 700];
        written += fs.write("/big", &data, written).unwrap();
    }

    assert_eq!(written, 3500);
    assert_eq!(fs.file_blocks("/big").unwrap().len(), 3500usize.div_ceil(BLOCK_SIZE));

    let contents = read_to_vec(&fs, "/big", 0, written);
    assert_eq!(contents[699], 0);
    assert_eq!(contents[700], 1);
    assert_eq!(contents[3499], 4);

    assert_eq!(fs.write("/big", b"x", written + 1), Err(NewfsError::Seek));
}

#[test]
fn test_directory_is_not_a_file() {
    let mut fs = new_fs();
    fs.create_directory("/d").unwrap();

    assert_eq!(fs.write("/d", b"x", 0), Err(NewfsError::IsDirectory));
    assert_eq!(fs.truncate("/d", 0), Err(NewfsError::IsDirectory));

    let mut buf = [0; 4];
    assert_eq!(fs.read("/d", &mut buf, 0), Err(NewfsError::IsDirectory));
}
