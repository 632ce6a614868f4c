pub const REPORTS_PROCESSED: &str = "report_processor_reports_processed_total";
pub const REPORT_PROCESSING_SECONDS: &str = "report_processor_report_processing_seconds";
pub const SLICES_ACCEPTED: &str = "report_processor_slices_accepted_total";
pub const SLICES_DISCARDED: &str = "report_processor_slices_discarded_total";
pub const REPORT_FILES_UNDECODABLE: &str = "report_processor_report_files_undecodable_total";
pub const HOSTS_CANDIDATE: &str = "report_processor_hosts_candidate_total";
pub const HOSTS_REJECTED: &str = "report_processor_hosts_rejected_total";
pub const HOSTS_TRANSFORMED: &str = "report_processor_hosts_transformed_total";
pub const HOSTS_PUBLISHED: &str = "report_processor_hosts_published_total";
pub const HOSTS_PUBLISH_FAILED: &str = "report_processor_hosts_publish_failed_total";
