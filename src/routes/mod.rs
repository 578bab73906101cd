use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::app_error::AppError;
use crate::schema::merchants as merchants_schema;

pub mod carts;
pub mod categories;
pub mod items;
pub mod merchants;
pub mod orders;
pub mod products;
pub mod subscriptions;

/// Resolve the merchant profile owned by an authenticated user.
pub(crate) async fn merchant_id_for_user(
    conn: &mut AsyncPgConnection,
    user_id: i32,
) -> Result<i32, AppError> {
    merchants_schema::table
        .filter(merchants_schema::user_id.eq(user_id))
        .select(merchants_schema::id)
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::ForbiddenResource("Merchant profile not found".into()))
}

/// Cache-key segment for an optional filter value.
pub(crate) fn key_segment<T: ToString>(value: Option<&T>) -> String {
    value.map_or_else(|| "all".to_string(), ToString::to_string)
}

/// Cache patterns that go stale whenever a merchant's public catalog changes,
/// whether through stock movement or a gate flip (verification, activation,
/// subscription status).
pub(crate) fn merchant_catalog_patterns(merchant_id: i32) -> [String; 2] {
    [
        "products:*".to_string(),
        format!("merchant:{merchant_id}:products:*"),
    ]
}

#[cfg(test)]
mod tests {
    use super::{key_segment, merchant_catalog_patterns};

    #[test]
    fn key_segment_is_total_over_filters() {
        assert_eq!(key_segment(Some(&7)), "7");
        assert_eq!(key_segment::<i32>(None), "all");
        assert_eq!(key_segment(Some(&"available".to_string())), "available");
    }

    #[test]
    fn catalog_patterns_cover_public_and_merchant_listings() {
        let patterns = merchant_catalog_patterns(7);
        assert!(patterns.contains(&"products:*".to_string()));
        assert!(patterns.contains(&"merchant:7:products:*".to_string()));
    }
}
