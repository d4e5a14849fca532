/// An authenticated API session, passed explicitly into every call rather
/// than read from ambient storage. When a call fails with `AuthExpired` the
/// owner should drop the session and re-authenticate.
#[derive(Debug, Clone)]
pub struct Session {
    base_url: String,
    bearer_token: String,
}

impl Session {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            bearer_token: bearer_token.into(),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }
}

#[cfg(test)]
mod tests {
    use super::Session;

    #[test]
    fn joins_endpoint_paths() {
        let session = Session::new("https://api.example.com/", "tok");
        assert_eq!(
            session.endpoint("/pg-tenant/payments/next-due"),
            "https://api.example.com/pg-tenant/payments/next-due"
        );
        assert_eq!(
            session.endpoint("pg-tenant/payments"),
            "https://api.example.com/pg-tenant/payments"
        );
    }
}
