pub mod dispatcher;
pub mod fcm_auth;
pub mod odoo;
pub mod recent_ids;
pub mod registry;
pub mod resolver;
pub mod watermark;
