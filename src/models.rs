use chrono::{DateTime, NaiveDate, Utc};
use diesel::{
    Selectable,
    prelude::{Identifiable, Insertable, Queryable},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// Categories

#[derive(Queryable, Selectable, Identifiable, Serialize, Deserialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::categories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CategoryEntity {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Deserialize, Debug)]
#[diesel(table_name = crate::schema::categories)]
pub struct CreateCategoryEntity {
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
}

// Items master

#[derive(Queryable, Selectable, Identifiable, Serialize, Deserialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::items_master)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ItemMasterEntity {
    pub id: i32,
    pub category_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Option<f64>,
    pub unit: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Deserialize, Debug)]
#[diesel(table_name = crate::schema::items_master)]
pub struct CreateItemMasterEntity {
    pub category_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Option<f64>,
    pub unit: Option<String>,
    pub is_active: bool,
}

// Merchants
//
// Identity lives upstream; a merchant row links a gateway user to a business
// profile. The public visibility gate reads is_verified / is_active /
// subscription_status.

#[derive(Queryable, Selectable, Identifiable, Serialize, Deserialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::merchants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MerchantEntity {
    pub id: i32,
    pub user_id: i32,
    pub business_name: String,
    pub category_id: Option<i32>,
    pub subscription_status: String,
    pub subscription_start_date: Option<NaiveDate>,
    pub subscription_end_date: Option<NaiveDate>,
    pub subscription_amount: Option<f64>,
    pub is_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::merchants)]
pub struct CreateMerchantEntity {
    pub user_id: i32,
    pub business_name: String,
    pub category_id: Option<i32>,
}

// Merchant products

pub const PRODUCT_STATUS_AVAILABLE: &str = "available";
pub const PRODUCT_STATUSES: [&str; 3] = ["available", "out_of_stock", "not_available"];

#[derive(Queryable, Selectable, Identifiable, Serialize, Deserialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::merchant_products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MerchantProductEntity {
    pub id: i32,
    pub merchant_id: i32,
    pub item_master_id: i32,
    pub custom_name: Option<String>,
    pub description: Option<String>,
    pub price: f64,
    pub stock_quantity: i32,
    pub status: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::merchant_products)]
pub struct CreateMerchantProductEntity {
    pub merchant_id: i32,
    pub item_master_id: i32,
    pub custom_name: Option<String>,
    pub description: Option<String>,
    pub price: f64,
    pub stock_quantity: i32,
    pub status: String,
    pub is_active: bool,
}

// Cart

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::cart_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartItemEntity {
    pub id: i32,
    pub user_id: i32,
    pub merchant_product_id: i32,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Orders

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub id: i32,
    pub order_number: String,
    pub user_id: Option<i32>,
    pub merchant_id: i32,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub delivery_address: String,
    pub total_amount: f64,
    pub payment_method: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::orders)]
pub struct CreateOrderEntity {
    pub order_number: String,
    pub user_id: Option<i32>,
    pub merchant_id: i32,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub delivery_address: String,
    pub total_amount: f64,
    pub payment_method: String,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemEntity {
    pub id: i32,
    pub order_id: i32,
    pub merchant_product_id: i32,
    pub product_name: String,
    pub price: f64,
    pub quantity: i32,
    pub subtotal: f64,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::order_items)]
pub struct CreateOrderItemEntity {
    pub order_id: i32,
    pub merchant_product_id: i32,
    pub product_name: String,
    pub price: f64,
    pub quantity: i32,
    pub subtotal: f64,
}

// Subscription payments

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::subscription_payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionPaymentEntity {
    pub id: Uuid,
    pub merchant_id: i32,
    pub amount: f64,
    pub payment_method: String,
    pub payment_status: String,
    pub transaction_id: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub subscription_start_date: NaiveDate,
    pub subscription_end_date: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::subscription_payments)]
pub struct CreateSubscriptionPaymentEntity {
    pub merchant_id: i32,
    pub amount: f64,
    pub payment_method: String,
    pub payment_status: String,
    pub transaction_id: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub subscription_start_date: NaiveDate,
    pub subscription_end_date: NaiveDate,
    pub notes: Option<String>,
}

// Order status machine

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    PartialAccepted,
    Rejected,
    Processing,
    PartialProcessing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::PartialAccepted => "partial_accepted",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Processing => "processing",
            OrderStatus::PartialProcessing => "partial_processing",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "accepted" => Some(OrderStatus::Accepted),
            "partial_accepted" => Some(OrderStatus::PartialAccepted),
            "rejected" => Some(OrderStatus::Rejected),
            "processing" => Some(OrderStatus::Processing),
            "partial_processing" => Some(OrderStatus::PartialProcessing),
            "out_for_delivery" => Some(OrderStatus::OutForDelivery),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }

    /// Fulfilment state machine. Any non-terminal state may be cancelled.
    pub fn can_transition_to(self, next: Self) -> bool {
        use OrderStatus::*;
        if next == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, Accepted | PartialAccepted | Rejected)
                | (Accepted | PartialAccepted, Processing | PartialProcessing)
                | (Processing | PartialProcessing, OutForDelivery)
                | (OutForDelivery, Delivered)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::{self, *};

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            Pending,
            Accepted,
            PartialAccepted,
            Rejected,
            Processing,
            PartialProcessing,
            OutForDelivery,
            Delivered,
            Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("shipped"), None);
    }

    #[test]
    fn happy_path_transitions() {
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(PartialAccepted));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Accepted.can_transition_to(Processing));
        assert!(PartialAccepted.can_transition_to(PartialProcessing));
        assert!(Processing.can_transition_to(OutForDelivery));
        assert!(PartialProcessing.can_transition_to(OutForDelivery));
        assert!(OutForDelivery.can_transition_to(Delivered));
    }

    #[test]
    fn cancellation_from_any_non_terminal_state() {
        for status in [Pending, Accepted, PartialAccepted, Processing, OutForDelivery] {
            assert!(status.can_transition_to(Cancelled));
        }
        for status in [Delivered, Rejected, Cancelled] {
            assert!(!status.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Pending.can_transition_to(OutForDelivery));
        assert!(!Accepted.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Accepted));
    }
}
