use http::{header, HeaderName, HeaderValue};

pub(crate) trait HeaderIterExt {
    fn has_expect_100(self) -> bool;
}

impl<'a, I: Iterator<Item = (&'a HeaderName, &'a HeaderValue)>> HeaderIterExt for I {
    fn has_expect_100(self) -> bool {
        // The only recognized expectation token is 100-continue. Other
        // tokens are forwarded verbatim but never gate the body.
        self.filter(|i| *i.0 == header::EXPECT).any(|i| {
            i.1.to_str()
                .map(|v| {
                    v.split(',')
                        .any(|t| t.trim().eq_ignore_ascii_case("100-continue"))
                })
                .unwrap_or(false)
        })
    }
}
