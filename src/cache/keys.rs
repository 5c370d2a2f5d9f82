pub struct CacheKeys;

impl CacheKeys {
    /// Pending request event awaiting its response: request:{request_id}
    pub fn pending_request(request_id: &str) -> String {
        format!("request:{}", request_id)
    }

    /// Tokens consumed today by an organization: consumption:org:{org_id}:today
    pub fn org_tokens_today(org_id: &str) -> String {
        format!("consumption:org:{}:today", org_id)
    }

    /// Tokens consumed today by a user: consumption:user:{user_id}:today
    pub fn user_tokens_today(user_id: &str) -> String {
        format!("consumption:user:{}:today", user_id)
    }
}
