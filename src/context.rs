//! Per-request context threaded explicitly through every operation

/// Tenant, request id and business scope of the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Tenant identity; every read and write is scoped to it
    pub owner_id: String,
    /// Correlation id carried into log records
    pub request_id: String,
    /// Acting user, recorded on created records
    pub user: Option<String>,
    /// Business scope for business-labelled attributes and unique constraints
    pub biz_id: Option<i64>,
    /// Caller may change attributes declared non-editable
    pub can_edit_all: bool,
}

impl RequestContext {
    /// Create a context for a tenant with a fresh request id
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            user: None,
            biz_id: None,
            can_edit_all: false,
        }
    }

    /// Use a caller-supplied request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Set the acting user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Narrow to a business scope
    pub fn with_biz(mut self, biz_id: i64) -> Self {
        self.biz_id = Some(biz_id);
        self
    }

    /// Grant edit rights on non-editable attributes
    pub fn with_edit_all(mut self) -> Self {
        self.can_edit_all = true;
        self
    }
}
