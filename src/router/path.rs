//! Lexical URL path cleanup.

/// Return the canonical form of an URL path.
///
/// Applied iteratively until nothing changes:
///
/// 1. Replace runs of slashes with a single slash.
/// 2. Drop each `.` element.
/// 3. Drop each `..` element together with the non-`..` element preceding it.
/// 4. Drop `..` elements that begin a rooted path.
///
/// The result always starts with `/`. A trailing slash survives, and an empty
/// input becomes `/`. Purely lexical: the filesystem is never consulted.
#[must_use]
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }

    let src = path.as_bytes();
    let n = src.len();
    let mut buf: Vec<u8> = Vec::with_capacity(n + 1);
    buf.push(b'/');

    let mut trailing = n > 1 && src[n - 1] == b'/';
    let mut r = usize::from(src[0] == b'/');

    while r < n {
        let at_element_end = |i: usize| i == n || src[i] == b'/';
        match src[r] {
            b'/' => r += 1,
            b'.' if at_element_end(r + 1) => {
                if r + 1 == n {
                    trailing = true;
                }
                r += 1;
            }
            b'.' if src.get(r + 1) == Some(&b'.') && at_element_end(r + 2) => {
                r += 2;
                if buf.len() > 1 {
                    let last = buf.iter().rposition(|&b| b == b'/').unwrap_or(0);
                    buf.truncate(last.max(1));
                }
            }
            _ => {
                if buf.len() > 1 {
                    buf.push(b'/');
                }
                while r < n && src[r] != b'/' {
                    buf.push(src[r]);
                    r += 1;
                }
            }
        }
    }

    if trailing && buf.len() > 1 {
        buf.push(b'/');
    }

    // only whole elements were copied, so the bytes stay valid UTF-8
    String::from_utf8(buf).unwrap_or_else(|_| "/".to_owned())
}

#[cfg(test)]
mod tests {
    use super::clean_path;

    #[test]
    fn test_clean_path() {
        let cases = [
            ("", "/"),
            ("/", "/"),
            ("abc", "/abc"),
            ("a/b/c", "/a/b/c"),
            ("/abc/", "/abc/"),
            ("abc//", "/abc/"),
            ("//abc", "/abc"),
            ("/abc//def//ghi", "/abc/def/ghi"),
            (".", "/"),
            ("./", "/"),
            ("abc/./def", "/abc/def"),
            ("abc/.", "/abc/"),
            ("..", "/"),
            ("../../abc", "/abc"),
            ("/abc/def/ghi/../jkl", "/abc/def/jkl"),
            ("/abc/def/../ghi/../jkl", "/abc/jkl"),
            ("/abc/def/..", "/abc"),
            ("/abc/def/../..", "/"),
            ("/abc/def/../../../ghi/jkl/../../../mno", "/mno"),
            ("/..a/b", "/..a/b"),
            ("/caf\u{e9}/../th\u{e9}", "/th\u{e9}"),
        ];
        for (input, expected) in cases {
            assert_eq!(clean_path(input), expected, "clean_path({input:?})");
        }
    }

    #[test]
    fn test_clean_path_is_idempotent() {
        for input in ["/a//b/./c/..", "x/y/../../z/", "/.//..//q"] {
            let once = clean_path(input);
            assert_eq!(clean_path(&once), once);
        }
    }
}
