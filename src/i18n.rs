use std::collections::HashMap;

pub struct I18n {
    translations: HashMap<String, HashMap<String, String>>,
    current_lang: String,
}

impl I18n {
    pub fn new(lang: &str) -> Self {
        let mut translations = HashMap::new();

        // 英文
        let mut en = HashMap::new();

        // Run / rerun
        en.insert("command_completed".to_string(), "Command completed, exit code: {0}".to_string());
        en.insert("command_not_started".to_string(), "Command could not be started".to_string());
        en.insert("execution_time".to_string(), "Execution time".to_string());
        en.insert("stdout".to_string(), "Standard output:".to_string());
        en.insert("stderr".to_string(), "Error output:".to_string());
        en.insert("result_saved".to_string(), "Result saved as {0}".to_string());
        en.insert("rerun_source".to_string(), "Replaying {0}: {1}".to_string());

        // Pipeline
        en.insert("pipeline_segment".to_string(), "[{0}/{1}] {2} (exit code: {3})".to_string());
        en.insert("pipeline_stopped".to_string(), "Pipeline stopped at segment {0} of {1}".to_string());
        en.insert("pipeline_output".to_string(), "Pipeline output:".to_string());

        // Chains
        en.insert("chain_created".to_string(), "Chain '{0}' created with {1} steps".to_string());
        en.insert("chain_deleted".to_string(), "Chain '{0}' deleted".to_string());
        en.insert("chain_step".to_string(), "[{0}/{1}] {2}".to_string());
        en.insert("chain_completed".to_string(), "Chain '{0}' completed: {1} steps run, {2} failed".to_string());
        en.insert("chain_aborted".to_string(), "Chain '{0}' aborted at step {1} of {2}".to_string());
        en.insert("no_chains".to_string(), "No chains defined".to_string());
        en.insert("chain_conditional".to_string(), "conditional".to_string());
        en.insert("chain_always".to_string(), "run all".to_string());
        en.insert("chain_stored".to_string(), "stored".to_string());

        // History
        en.insert("no_records".to_string(), "No records found".to_string());
        en.insert("history_records".to_string(), "History records ({0} of {1}):".to_string());
        en.insert("search_no_matches".to_string(), "No records match '{0}'".to_string());
        en.insert("tags_updated".to_string(), "Tags of {0}: {1}".to_string());
        en.insert("record_deleted".to_string(), "Deleted {0}".to_string());
        en.insert("status_ok".to_string(), "ok".to_string());
        en.insert("status_failed".to_string(), "failed".to_string());
        en.insert("label_id".to_string(), "ID".to_string());
        en.insert("label_command".to_string(), "Command".to_string());
        en.insert("label_status".to_string(), "Status".to_string());
        en.insert("label_created".to_string(), "Started".to_string());
        en.insert("label_terminated".to_string(), "Finished".to_string());
        en.insert("label_tags".to_string(), "Tags".to_string());
        en.insert("label_category".to_string(), "Category".to_string());
        en.insert("label_chain".to_string(), "Chain".to_string());
        en.insert("label_dir".to_string(), "Directory".to_string());

        // Clean
        en.insert("cleaned_records".to_string(), "Cleaned {0} records".to_string());
        en.insert("clean_all_summary".to_string(), "This removes all {0} records (chains are kept).".to_string());
        en.insert("clean_expired_summary".to_string(), "Removing records older than {0}".to_string());
        en.insert("confirm_delete_prompt".to_string(), "Type 'yes' to confirm: ".to_string());
        en.insert("confirm_aborted".to_string(), "Aborted, nothing was removed".to_string());
        en.insert("invalid_duration".to_string(), "Invalid duration '{0}', expected something like 30d, 12h or 45m".to_string());

        // Error messages
        en.insert("error_open_store".to_string(), "Failed to open record store".to_string());
        en.insert("error_save_record".to_string(), "Failed to save record".to_string());

        // 中文
        let mut zh = HashMap::new();

        zh.insert("command_completed".to_string(), "命令执行完成，退出码: {0}".to_string());
        zh.insert("command_not_started".to_string(), "命令无法启动".to_string());
        zh.insert("execution_time".to_string(), "执行时间".to_string());
        zh.insert("stdout".to_string(), "标准输出:".to_string());
        zh.insert("stderr".to_string(), "错误输出:".to_string());
        zh.insert("result_saved".to_string(), "结果已保存，编号 {0}".to_string());
        zh.insert("rerun_source".to_string(), "重放 {0}: {1}".to_string());

        zh.insert("pipeline_segment".to_string(), "[{0}/{1}] {2} (退出码: {3})".to_string());
        zh.insert("pipeline_stopped".to_string(), "管道在第 {0}/{1} 段停止".to_string());
        zh.insert("pipeline_output".to_string(), "管道输出:".to_string());

        zh.insert("chain_created".to_string(), "已创建命令链 '{0}'，共 {1} 步".to_string());
        zh.insert("chain_deleted".to_string(), "已删除命令链 '{0}'".to_string());
        zh.insert("chain_step".to_string(), "[{0}/{1}] {2}".to_string());
        zh.insert("chain_completed".to_string(), "命令链 '{0}' 执行完成: 运行 {1} 步，失败 {2} 步".to_string());
        zh.insert("chain_aborted".to_string(), "命令链 '{0}' 在第 {1}/{2} 步中止".to_string());
        zh.insert("no_chains".to_string(), "尚未定义命令链".to_string());
        zh.insert("chain_conditional".to_string(), "失败即停".to_string());
        zh.insert("chain_always".to_string(), "全部执行".to_string());
        zh.insert("chain_stored".to_string(), "保存结果".to_string());

        zh.insert("no_records".to_string(), "没有找到记录".to_string());
        zh.insert("history_records".to_string(), "历史记录 ({0}/{1}):".to_string());
        zh.insert("search_no_matches".to_string(), "没有匹配 '{0}' 的记录".to_string());
        zh.insert("tags_updated".to_string(), "{0} 的标签: {1}".to_string());
        zh.insert("record_deleted".to_string(), "已删除 {0}".to_string());
        zh.insert("status_ok".to_string(), "成功".to_string());
        zh.insert("status_failed".to_string(), "失败".to_string());
        zh.insert("label_id".to_string(), "编号".to_string());
        zh.insert("label_command".to_string(), "命令".to_string());
        zh.insert("label_status".to_string(), "状态".to_string());
        zh.insert("label_created".to_string(), "开始".to_string());
        zh.insert("label_terminated".to_string(), "结束".to_string());
        zh.insert("label_tags".to_string(), "标签".to_string());
        zh.insert("label_category".to_string(), "分类".to_string());
        zh.insert("label_chain".to_string(), "命令链".to_string());
        zh.insert("label_dir".to_string(), "目录".to_string());

        zh.insert("cleaned_records".to_string(), "已清理 {0} 条记录".to_string());
        zh.insert("clean_all_summary".to_string(), "将删除全部 {0} 条记录（命令链保留）。".to_string());
        zh.insert("clean_expired_summary".to_string(), "删除早于 {0} 的记录".to_string());
        zh.insert("confirm_delete_prompt".to_string(), "输入 'yes' 确认: ".to_string());
        zh.insert("confirm_aborted".to_string(), "已取消，未删除任何内容".to_string());
        zh.insert("invalid_duration".to_string(), "无效的时长 '{0}'，示例: 30d、12h、45m".to_string());

        zh.insert("error_open_store".to_string(), "无法打开记录存储".to_string());
        zh.insert("error_save_record".to_string(), "保存记录失败".to_string());

        translations.insert("en".to_string(), en);
        translations.insert("zh".to_string(), zh);

        let lang = lang.to_lowercase();
        let effective_lang = if lang.starts_with("zh") || lang == "chinese" {
            "zh"
        } else {
            // 默认使用英文
            "en"
        };

        Self {
            translations,
            current_lang: effective_lang.to_string(),
        }
    }

    pub fn t(&self, key: &str) -> String {
        if let Some(lang_map) = self.translations.get(&self.current_lang) {
            if let Some(value) = lang_map.get(key) {
                return value.clone();
            }
        }
        key.to_string()
    }

    pub fn t_format(&self, key: &str, args: &[&str]) -> String {
        let template = self.t(key);
        let mut result = template;
        for (i, arg) in args.iter().enumerate() {
            result = result.replace(&format!("{{{}}}", i), arg);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_language_from_locale() {
        assert_eq!(I18n::new("zh_CN").t("status_ok"), "成功");
        assert_eq!(I18n::new("en_US").t("status_ok"), "ok");
        assert_eq!(I18n::new("fr_FR").t("status_ok"), "ok");
    }

    #[test]
    fn formats_placeholders_and_falls_back_to_key() {
        let i18n = I18n::new("en");
        assert_eq!(
            i18n.t_format("chain_aborted", &["build", "2", "3"]),
            "Chain 'build' aborted at step 2 of 3"
        );
        assert_eq!(i18n.t("no_such_key"), "no_such_key");
    }

    #[test]
    fn both_catalogs_have_the_same_keys() {
        let i18n = I18n::new("en");
        let en = &i18n.translations["en"];
        let zh = &i18n.translations["zh"];
        for key in en.keys() {
            assert!(zh.contains_key(key), "missing zh translation for {}", key);
        }
        assert_eq!(en.len(), zh.len());
    }
}
