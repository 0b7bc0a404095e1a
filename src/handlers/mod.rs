pub mod inspector_api;
